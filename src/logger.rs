use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde_json::{Value, json};
use tracing::warn;

use crate::diff::diff_json;

/// How device-state bodies are written to the message log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageLogMode {
    /// Every state body in full.
    Full,
    /// First body per device in full, then only changed paths.
    Diffed,
}

/// Append-only NDJSON capture of API traffic.
pub(crate) struct MessageLogger {
    mode: MessageLogMode,
    file: File,
    previous_states: HashMap<String, Value>,
}

impl MessageLogger {
    pub fn new(mode: MessageLogMode, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            mode,
            file,
            previous_states: HashMap::new(),
        })
    }

    pub fn log_request(&mut self, method: &str, path: &str, status: Option<u16>) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "req",
            "method": method,
            "path": path,
            "status": status,
        });
        self.write_line(&entry);
    }

    pub fn log_write(&mut self, device_id: &str, body: &Value) {
        let entry = json!({
            "ts": Utc::now().to_rfc3339(),
            "dir": "cmd",
            "device": device_id,
            "body": body,
        });
        self.write_line(&entry);
    }

    pub fn log_state(&mut self, device_id: &str, body: &Value) {
        let ts = Utc::now().to_rfc3339();
        let entry = match (self.mode, self.previous_states.get(device_id)) {
            (MessageLogMode::Full, _) => json!({
                "ts": ts,
                "dir": "state",
                "device": device_id,
                "body": body,
            }),
            (MessageLogMode::Diffed, None) => json!({
                "ts": ts,
                "dir": "state",
                "device": device_id,
                "full": true,
                "body": body,
            }),
            (MessageLogMode::Diffed, Some(prev)) => {
                let mut changes = Vec::new();
                diff_json(prev, body, "", &mut changes);
                let changes: Vec<Value> = changes
                    .into_iter()
                    .map(|c| json!({ "path": c.path, "old": c.old, "new": c.new }))
                    .collect();
                json!({
                    "ts": ts,
                    "dir": "state",
                    "device": device_id,
                    "changes": changes,
                })
            }
        };
        self.write_line(&entry);

        if self.mode == MessageLogMode::Diffed {
            self.previous_states
                .insert(device_id.to_string(), body.clone());
        }
    }

    fn write_line(&mut self, entry: &Value) {
        if let Ok(line) = serde_json::to_string(entry)
            && let Err(e) = writeln!(self.file, "{line}")
        {
            warn!("failed to write log entry: {e}");
        }
    }
}

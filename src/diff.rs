use serde_json::Value;

use crate::types::{DeviceState, Event};

/// One changed leaf between two JSON documents, addressed by dotted path.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Change {
    pub path: String,
    pub old: Value,
    pub new: Value,
}

/// Collect leaf-level changes from `previous` to `current`. Keys present only
/// in `previous` are reported with a `null` new value.
pub(crate) fn diff_json(previous: &Value, current: &Value, path_prefix: &str, changes: &mut Vec<Change>) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = join_path(path_prefix, key);
                let prev_val = prev_map.get(key).unwrap_or(&Value::Null);
                if prev_val.is_null() && curr_val.is_object() {
                    diff_json(&Value::Object(serde_json::Map::new()), curr_val, &path, changes);
                } else {
                    diff_json(prev_val, curr_val, &path, changes);
                }
            }
            for (key, prev_val) in prev_map {
                if !curr_map.contains_key(key) {
                    changes.push(Change {
                        path: join_path(path_prefix, key),
                        old: prev_val.clone(),
                        new: Value::Null,
                    });
                }
            }
        }
        (prev, curr) if prev != curr => changes.push(Change {
            path: path_prefix.to_string(),
            old: prev.clone(),
            new: curr.clone(),
        }),
        _ => {}
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Typed events for the fields that differ between two snapshots. With no
/// previous snapshot every field is reported.
pub(crate) fn snapshot_events(previous: Option<&DeviceState>, current: &DeviceState) -> Vec<Event> {
    let mut events = Vec::new();

    if previous.is_none_or(|p| p.name != current.name) {
        events.push(Event::NameChanged {
            name: current.name.clone(),
        });
    }
    if previous.is_none_or(|p| p.hvac_mode != current.hvac_mode) {
        events.push(Event::ModeChanged {
            mode: current.hvac_mode,
        });
    }
    if previous.is_none_or(|p| p.target_temperature != current.target_temperature) {
        events.push(Event::TargetTemperatureChanged {
            temperature: current.target_temperature,
        });
    }
    if previous.is_none_or(|p| p.current_temperature != current.current_temperature) {
        events.push(Event::CurrentTemperatureChanged {
            temperature: current.current_temperature,
        });
    }

    events
}

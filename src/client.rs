use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};

use crate::api::ThermostatApi;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::protocol::{DEFAULT_BASE_URL, RawDeviceState, device_state_path, user_path};
use crate::types::*;
use crate::{Error, Result};

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct LuxClientBuilder {
    base_url: String,
    credentials: Option<Credentials>,
    tokens: TokenBundle,
    request_timeout: Duration,
    log_mode: Option<MessageLogMode>,
    log_path: Option<PathBuf>,
}

impl LuxClientBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            credentials: None,
            tokens: TokenBundle::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            log_mode: None,
            log_path: None,
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn tokens(mut self, tokens: TokenBundle) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<PathBuf>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<LuxClient> {
        let http = reqwest::Client::builder()
            .timeout(self.request_timeout)
            .build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(Mutex::new(MessageLogger::new(mode, path)?)),
            _ => None,
        };

        Ok(LuxClient {
            http,
            base_url: self.base_url,
            credentials: self.credentials,
            tokens: self.tokens,
            logger,
        })
    }
}

impl Default for LuxClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// HTTP client for the Lux Geo cloud API. Authenticates with the bearer
/// token from a [`TokenBundle`] obtained elsewhere.
pub struct LuxClient {
    http: reqwest::Client,
    base_url: String,
    credentials: Option<Credentials>,
    tokens: TokenBundle,
    logger: Option<Mutex<MessageLogger>>,
}

impl LuxClient {
    pub fn builder() -> LuxClientBuilder {
        LuxClientBuilder::new()
    }

    /// Client for a persisted configuration, reusing its cached tokens.
    pub fn from_entry(entry: &EntryData) -> LuxClientBuilder {
        LuxClientBuilder::new()
            .credentials(entry.credentials())
            .tokens(entry.tokens.clone())
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn username(&self) -> Option<&str> {
        self.credentials.as_ref().map(|c| c.username.as_str())
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value> {
        let url = format!("{}{}", self.base_url, path);
        debug!(%method, url = %url, "lux api request");

        let mut req = self
            .http
            .request(method.clone(), &url)
            .bearer_auth(&self.tokens.access_token);
        if let Some(body) = body {
            req = req.json(body);
        }

        let resp = req.send().await?;
        let status = resp.status();
        self.with_logger(|l| l.log_request(method.as_str(), path, Some(status.as_u16())));

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Unauthorized);
        }
        let resp = resp.error_for_status()?;

        let text = resp.text().await?;
        trace!(len = text.len(), "lux api response");
        if text.trim().is_empty() {
            return Err(Error::Protocol(format!("empty response body from {path}")));
        }
        Ok(serde_json::from_str(&text)?)
    }

    fn with_logger(&self, f: impl FnOnce(&mut MessageLogger)) {
        if let Some(logger) = &self.logger
            && let Ok(mut guard) = logger.lock()
        {
            f(&mut guard);
        }
    }
}

#[async_trait]
impl ThermostatApi for LuxClient {
    async fn get_user(&self) -> Result<Account> {
        let body = self.request(Method::GET, user_path(), None).await?;
        Ok(serde_json::from_value(body)?)
    }

    async fn get_device_state(&self, device_id: &str) -> Result<RawDeviceState> {
        let body = self
            .request(Method::GET, &device_state_path(device_id), None)
            .await?;
        self.with_logger(|l| l.log_state(device_id, &body));
        RawDeviceState::from_value(body)
    }

    async fn set_device_state(
        &self,
        device_id: &str,
        state: &RawDeviceState,
    ) -> Result<RawDeviceState> {
        let payload = state.to_value();
        self.with_logger(|l| l.log_write(device_id, &payload));
        let body = self
            .request(Method::PUT, &device_state_path(device_id), Some(&payload))
            .await?;
        self.with_logger(|l| l.log_state(device_id, &body));
        RawDeviceState::from_value(body)
    }
}

use std::fmt;

#[derive(Debug)]
pub enum Error {
    Http(reqwest::Error),
    Json(serde_json::Error),
    Io(std::io::Error),
    /// The API rejected the cached tokens (401/403).
    Unauthorized,
    /// Login was refused at configuration time.
    InvalidAuth(String),
    /// The account could not be fetched at configuration time.
    CannotConnect(String),
    /// The account cannot back a coordinator. Not retried.
    Setup(String),
    NotInitialized,
    /// First refresh failed; the host should retry setup later.
    NotReady(String),
    Protocol(String),
    Timeout,
    UpdateFailed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Http(e) => write!(f, "HTTP error: {e}"),
            Error::Json(e) => write!(f, "JSON error: {e}"),
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Unauthorized => write!(f, "unauthorized (tokens rejected)"),
            Error::InvalidAuth(msg) => write!(f, "invalid authentication: {msg}"),
            Error::CannotConnect(msg) => write!(f, "cannot connect: {msg}"),
            Error::Setup(msg) => write!(f, "setup error: {msg}"),
            Error::NotInitialized => write!(f, "coordinator not initialized"),
            Error::NotReady(msg) => write!(f, "not ready: {msg}"),
            Error::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Error::Timeout => write!(f, "refresh timed out"),
            Error::UpdateFailed(msg) => write!(f, "error communicating with API: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Http(e) => Some(e),
            Error::Json(e) => Some(e),
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl Error {
    /// Setup errors leave the configuration unusable until it is reloaded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Setup(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Http(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum CskError {
    #[error("I/O Error: {0}")]
    Io(#[from] Arc<std::io::Error>),

    #[error("HTTP Request Error: {0}")]
    Http(#[from] Arc<reqwest::Error>),

    #[error("JSON Parsing Error: {0}")]
    Json(#[from] Arc<serde_json::Error>),

    #[error("TOML Parsing Error: {0}")]
    Toml(#[from] Arc<toml::de::Error>),

    #[error("TOML Serialization Error: {0}")]
    TomlSer(#[from] Arc<toml::ser::Error>),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Parsing Error in {0}: {1}")]
    ParseError(String, String),

    #[error("DownloadError: Failed to download '{0}' from '{1}': {2}")]
    DownloadError(String, String, String),

    #[error("Checksum Mismatch: {0}")]
    ChecksumMismatch(String),

    #[error("Validation Error: {0}")]
    ValidationError(String),

    #[error("Privilege elevation denied: {0}")]
    PrivilegeDenied(String),

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("Action timed out after {1:?}: {0}")]
    ActionTimeout(String, Duration),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Cache Error: {0}")]
    Cache(String),

    #[error("Resource Not Found: {0}")]
    NotFound(String),

    #[error("IoError: {0}")]
    IoError(String),

    #[error("HttpError: {0}")]
    HttpError(String),
}

impl CskError {
    /// Shorthand for a manifest parse failure attributed to `source`.
    pub fn parse(source: impl Into<String>, msg: impl Into<String>) -> Self {
        CskError::ParseError(source.into(), msg.into())
    }

    /// True for `std::io::ErrorKind::NotFound`, however the io error was wrapped.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CskError::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    /// True for `std::io::ErrorKind::PermissionDenied`.
    pub fn is_permission_denied(&self) -> bool {
        matches!(self, CskError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied)
    }
}

impl From<std::io::Error> for CskError {
    fn from(err: std::io::Error) -> Self {
        CskError::Io(Arc::new(err))
    }
}

impl From<reqwest::Error> for CskError {
    fn from(err: reqwest::Error) -> Self {
        CskError::Http(Arc::new(err))
    }
}

impl From<serde_json::Error> for CskError {
    fn from(err: serde_json::Error) -> Self {
        CskError::Json(Arc::new(err))
    }
}

impl From<toml::de::Error> for CskError {
    fn from(err: toml::de::Error) -> Self {
        CskError::Toml(Arc::new(err))
    }
}

impl From<toml::ser::Error> for CskError {
    fn from(err: toml::ser::Error) -> Self {
        CskError::TomlSer(Arc::new(err))
    }
}

pub type Result<T> = std::result::Result<T, CskError>;

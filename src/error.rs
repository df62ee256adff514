//! Error types for the baidu_pan crate.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur when talking to Baidu Netdisk.
#[derive(Error, Debug)]
pub enum PanError {
    #[error("Missing configuration keys: {}", missing.join(", "))]
    MissingConfig { missing: Vec<String> },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    #[error("API error ({code}): {message}")]
    RemoteApi { code: i64, message: String },

    #[error("File already exists: {}", .0.display())]
    FileExists(PathBuf),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Slice {part} checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        part: usize,
        expected: String,
        actual: String,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

impl PanError {
    /// Whether retrying the same idempotent request might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            PanError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            PanError::RemoteApi { code, .. } => (500..600).contains(code),
            _ => false,
        }
    }
}

/// Result type alias for PanError.
pub type Result<T> = std::result::Result<T, PanError>;

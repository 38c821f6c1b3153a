//! Error types for the pipeline layers.
//!
//! None of these cross the ingestion boundary: the writer and the volume
//! guard log them and report a status instead. Only [`ExportError`] reaches
//! callers.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors from the rotated writer. Logged and folded into
/// [`AppendStatus::Failed`](crate::store::AppendStatus::Failed).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to create log directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append to {path}: {source}")]
    Append {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("writer task failed: {0}")]
    Task(String),
}

/// Errors from the historical exporter.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("start and end are required")]
    MissingRange,

    #[error("invalid {which} bound: {value:?}")]
    InvalidBound { which: &'static str, value: String },

    #[error("failed to read log storage: {0}")]
    Io(#[from] std::io::Error),

    #[error("export task failed: {0}")]
    Task(String),
}

impl ExportError {
    /// True for errors caused by the request rather than the store.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ExportError::MissingRange | ExportError::InvalidBound { .. })
    }
}

/// Errors from dispatching a threshold alert.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("invalid webhook url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to encode alert: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("webhook request failed: {0}")]
    Transport(String),

    #[error("webhook responded with status {0}")]
    Status(u16),

    #[error("webhook request timed out after {0:?}")]
    Timeout(Duration),
}

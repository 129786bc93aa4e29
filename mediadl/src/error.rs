//! Application-wide error types.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Download canceled: selection returned no streams")]
    SelectionCanceled,

    #[error("Extraction service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Extraction failed: {0}")]
    Extraction(String),

    #[error("Invalid stream descriptor {format_id}: {reason}")]
    InvalidDescriptor { format_id: String, reason: String },

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Unexpected HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Transfer cancelled")]
    TransferCancelled,

    #[error("Merge/transcode failed: {0}")]
    Pipeline(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error while {op} {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn invalid_descriptor(format_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDescriptor {
            format_id: format_id.into(),
            reason: reason.into(),
        }
    }

    pub fn pipeline(msg: impl Into<String>) -> Self {
        Self::Pipeline(msg.into())
    }

    /// Whether this error is the result of an explicit cancellation.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::TransferCancelled | Self::SelectionCanceled)
    }

    /// Classify this error for delivery to an awaiting caller.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::SelectionCanceled | Self::TransferCancelled => FailureKind::Canceled,
            Self::InvalidDescriptor { .. } => FailureKind::InvalidDescriptor,
            Self::Pipeline(_) => FailureKind::Pipeline,
            _ => FailureKind::Transfer,
        }
    }
}

/// Category of a job failure delivered through the completion channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Canceled,
    InvalidDescriptor,
    Transfer,
    Pipeline,
}

/// Cloneable failure report.
///
/// `Error` wraps non-cloneable sources (`std::io::Error`, `reqwest::Error`),
/// so failures crossing task boundaries are flattened into this shape and
/// converted back into an [`Error`] for the awaiting caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl DownloadFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn canceled() -> Self {
        Self::new(FailureKind::Canceled, "transfer cancelled")
    }
}

impl From<&Error> for DownloadFailure {
    fn from(err: &Error) -> Self {
        Self::new(err.failure_kind(), err.to_string())
    }
}

impl From<DownloadFailure> for Error {
    fn from(failure: DownloadFailure) -> Self {
        match failure.kind {
            FailureKind::Canceled => Error::TransferCancelled,
            FailureKind::InvalidDescriptor => Error::InvalidDescriptor {
                format_id: String::new(),
                reason: failure.message,
            },
            FailureKind::Transfer => Error::Transfer(failure.message),
            FailureKind::Pipeline => Error::Pipeline(failure.message),
        }
    }
}

impl fmt::Display for DownloadFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

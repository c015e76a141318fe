//! Crate-wide error type.
//!
//! Per-payer and per-file failures are mostly absorbed into statuses and
//! counters by the services; `SyncError` is what crosses a collaborator
//! boundary before that happens.

use std::{fmt, io};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("storage call `{operation}` failed for s3://{bucket}/{key}: {message}")]
    Storage {
        operation: &'static str,
        bucket: String,
        key: String,
        message: String,
    },
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("payer configuration source failed: {0}")]
    ConfigSource(String),
    #[error("watermark store unavailable: {0}")]
    WatermarkUnavailable(String),
    #[error("downstream materialization failed: {0}")]
    Downstream(String),
    #[error("notification via {sink} failed: {message}")]
    Notification { sink: &'static str, message: String },
    #[error("invalid run parameters: {0}")]
    InvalidParams(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// Build a storage error from any displayable backend failure.
    pub fn storage(
        operation: &'static str,
        bucket: impl Into<String>,
        key: impl Into<String>,
        err: impl fmt::Display,
    ) -> Self {
        Self::Storage {
            operation,
            bucket: bucket.into(),
            key: key.into(),
            message: err.to_string(),
        }
    }

    pub fn notification(sink: &'static str, err: impl fmt::Display) -> Self {
        Self::Notification {
            sink,
            message: err.to_string(),
        }
    }

    /// Short machine-friendly name used as the failure reason of fatal runs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Storage { .. } => "StorageError",
            Self::InvalidBucketName { .. } => "InvalidBucketName",
            Self::ConfigSource(_) => "ConfigSourceError",
            Self::WatermarkUnavailable(_) => "WatermarkUnavailable",
            Self::Downstream(_) => "DownstreamError",
            Self::Notification { .. } => "NotificationError",
            Self::InvalidParams(_) => "InvalidParameters",
            Self::Sqlx(_) => "DatabaseError",
            Self::Http(_) => "HttpError",
            Self::Json(_) => "JsonError",
            Self::Io(_) => "IoError",
        }
    }
}

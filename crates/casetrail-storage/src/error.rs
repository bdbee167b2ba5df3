//! Error types for casetrail-storage

use casetrail_core::{BlobUri, EventError};
use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// Input rejected before any storage call
    #[error("validation error: {0}")]
    Validation(String),

    /// A blob reference resolved to nothing
    #[error("blob not found: {0}")]
    BlobNotFound(String),

    /// Transient failure from the backing store; retryable when flagged
    #[error("storage unavailable: {message}")]
    Unavailable { message: String, retryable: bool },

    /// Blob and metadata writes disagree
    ///
    /// With blob-first write ordering the usual shape is a successful blob
    /// write followed by a failed metadata write, leaving an unreferenced
    /// orphan named here for external reconciliation.
    #[error("partial write: blob_written={blob_written}, metadata_written={metadata_written}")]
    PartialWrite {
        blob_written: bool,
        metadata_written: bool,
        orphan: Option<BlobUri>,
        #[source]
        source: Box<StorageError>,
    },

    /// Blob size exceeds the configured cap
    #[error("storage capacity exceeded")]
    CapacityExceeded,

    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// Error during serialization
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Database error from either backend
    #[error("database error: {0}")]
    Database(String),
}

impl StorageError {
    /// Create a new Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a new BlobNotFound error
    pub fn blob_not_found(reference: impl Into<String>) -> Self {
        Self::BlobNotFound(reference.into())
    }

    /// Create a new retryable Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Whether a caller may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { retryable: true, .. })
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => StorageError::BlobNotFound(err.to_string()),
            ErrorKind::TimedOut
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock
            | ErrorKind::ResourceBusy => StorageError::Unavailable {
                message: err.to_string(),
                retryable: true,
            },
            _ => StorageError::Io(err.to_string()),
        }
    }
}

impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<EventError> for StorageError {
    fn from(err: EventError) -> Self {
        StorageError::Validation(err.to_string())
    }
}

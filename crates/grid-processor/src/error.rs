//! Error types for regridding and archive access.

use healpix::HealpixError;
use thiserror::Error;

/// Errors that can occur while regridding or touching the archive.
#[derive(Error, Debug)]
pub enum GridProcessorError {
    /// The input field is malformed: missing, duplicate or unknown axes,
    /// coordinate lengths that do not match the data, or a requested
    /// coordinate that is not present.
    #[error("schema error: {0}")]
    Schema(String),

    /// The tessellation level parameters are invalid.
    #[error("invalid tessellation level: {0}")]
    InvalidLevel(#[from] HealpixError),

    /// The archive exists but cannot be interpreted.
    #[error("archive unavailable: {0}")]
    ArchiveUnavailable(String),

    /// A write to the archive failed or was rejected.
    #[error("store write failed: {0}")]
    StoreWrite(String),

    /// Another writer holds the group lock.
    #[error("archive group is locked by another writer: {0}")]
    ArchiveLocked(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl GridProcessorError {
    /// Create a Schema error.
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create an ArchiveUnavailable error.
    pub fn archive_unavailable(msg: impl Into<String>) -> Self {
        Self::ArchiveUnavailable(msg.into())
    }

    /// Create a StoreWrite error.
    pub fn store_write(msg: impl Into<String>) -> Self {
        Self::StoreWrite(msg.into())
    }

    /// Create a Config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error means the archive itself cannot be trusted.
    pub fn is_archive_unavailable(&self) -> bool {
        matches!(self, Self::ArchiveUnavailable(_))
    }
}

impl From<std::io::Error> for GridProcessorError {
    fn from(err: std::io::Error) -> Self {
        Self::StoreWrite(err.to_string())
    }
}

impl From<serde_json::Error> for GridProcessorError {
    fn from(err: serde_json::Error) -> Self {
        Self::StoreWrite(err.to_string())
    }
}

/// Result type for grid processor operations.
pub type Result<T> = std::result::Result<T, GridProcessorError>;

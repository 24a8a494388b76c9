//! Error types for the ingestion crate.

use grid_processor::GridProcessorError;
use thiserror::Error;

/// Errors that can occur while scheduling or processing days.
#[derive(Error, Debug)]
pub enum IngestionError {
    /// The raw field for a day could not be obtained.
    #[error("Failed to fetch raw field: {0}")]
    Fetch(String),

    /// The requested date range is inverted.
    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error(transparent)]
    Grid(#[from] GridProcessorError),

    #[error("Completion ledger error: {0}")]
    Ledger(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A blocking task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Join(String),
}

impl IngestionError {
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Errors after which no further day can be trusted to run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Grid(e) if e.is_archive_unavailable())
    }
}

impl From<sqlx::Error> for IngestionError {
    fn from(err: sqlx::Error) -> Self {
        Self::Ledger(err.to_string())
    }
}

impl From<tokio::task::JoinError> for IngestionError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Join(err.to_string())
    }
}

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, IngestionError>;

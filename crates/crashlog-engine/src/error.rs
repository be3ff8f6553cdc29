//! Error types for the crash log engine

use thiserror::Error;

use crashlog_core::{ParseKindError, ParsePriorityError, StorageError, VersionParseError};

use crate::flush::UploadError;

/// Errors that can occur in engine operations
#[derive(Debug, Error)]
pub enum EngineError {
    /// Store error, including an unreachable store
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Invalid arguments, rejected before any I/O
    #[error("Validation error: {0}")]
    Validation(String),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(String),
}

impl EngineError {
    /// Create a new Validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Whether the underlying store could not be reached
    pub fn is_store_unavailable(&self) -> bool {
        matches!(self, EngineError::Storage(StorageError::Unavailable(_)))
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

impl From<ParseKindError> for EngineError {
    fn from(e: ParseKindError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

impl From<ParsePriorityError> for EngineError {
    fn from(e: ParsePriorityError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

impl From<VersionParseError> for EngineError {
    fn from(e: VersionParseError) -> Self {
        EngineError::Validation(e.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(e: toml::de::Error) -> Self {
        EngineError::Config(e.to_string())
    }
}

/// Errors that end a flush early
///
/// Cancellation and an uploader returning `false` are not errors: the flush
/// stops and reports how many records were flushed.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error("Storage error during flush: {0}")]
    Storage(#[from] StorageError),

    /// The uploader raised an error; records it did not confirm stay stored
    #[error("Upload failed after {flushed} record(s) were flushed: {source}")]
    Upload {
        flushed: usize,
        #[source]
        source: UploadError,
    },
}

impl FlushError {
    /// Records flushed before the error, if the error came from the uploader
    pub fn flushed(&self) -> Option<usize> {
        match self {
            FlushError::Upload { flushed, .. } => Some(*flushed),
            FlushError::Storage(_) => None,
        }
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

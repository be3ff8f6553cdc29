//! Error types for Crashlog

use thiserror::Error;

/// Errors raised by a [`LogStore`](crate::LogStore) adapter
#[derive(Debug, Error)]
pub enum StorageError {
    /// The store could not be opened or reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Storage I/O error: {0}")]
    Io(String),

    /// Error reported by the underlying database engine
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StorageError {
    /// Create a new Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a new Database error
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database(message.into())
    }

    /// Create a new NotFound error
    pub fn not_found(item: impl Into<String>) -> Self {
        Self::NotFound(item.into())
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

/// Failure to parse an [`AppVersion`](crate::AppVersion) from text
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionParseError {
    #[error("Empty version string")]
    Empty,

    #[error("Too many version components: {0} (at most 4)")]
    TooManyComponents(usize),

    #[error("Invalid version component {component:?} in {input:?}")]
    InvalidComponent { input: String, component: String },
}

/// Unknown record kind token
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown record kind: {0}")]
pub struct ParseKindError(pub String);

/// Unknown event priority name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown priority: {0}")]
pub struct ParsePriorityError(pub String);

/// Result type alias for store operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::unavailable("db locked");
        assert!(err.to_string().contains("Store unavailable"));
        assert!(err.to_string().contains("db locked"));

        let err = StorageError::not_found("record 7");
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: StorageError = io_err.into();
        assert!(matches!(err, StorageError::Io(_)));
    }

    #[test]
    fn test_version_parse_error_display() {
        let err = VersionParseError::InvalidComponent {
            input: "1.x".into(),
            component: "x".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"x\""));
        assert!(msg.contains("1.x"));
    }
}

//! Error types for memento-storage

use std::fmt;
use thiserror::Error;

/// Storage error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Database errors (SQLite)
    Database,
    /// Serialization/deserialization errors
    Serialization,
    /// Entity not found
    EntityNotFound,
    /// Relationship not found
    RelationshipNotFound,
    /// Checkpoint not found
    CheckpointNotFound,
    /// Vector dimension does not match the store's configured dimension
    DimensionMismatch,
    /// Transaction errors
    Transaction,
    /// Data-integrity violation (e.g. duplicate id after normalization mismatch)
    Constraint,
    /// Configuration errors
    Config,
    /// I/O errors
    IO,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Database => "database",
            ErrorKind::Serialization => "serialization",
            ErrorKind::EntityNotFound => "entity_not_found",
            ErrorKind::RelationshipNotFound => "relationship_not_found",
            ErrorKind::CheckpointNotFound => "checkpoint_not_found",
            ErrorKind::DimensionMismatch => "dimension_mismatch",
            ErrorKind::Transaction => "transaction",
            ErrorKind::Constraint => "constraint",
            ErrorKind::Config => "config",
            ErrorKind::IO => "io",
        }
    }

    /// Whether a caller may reasonably retry the operation that produced this kind.
    ///
    /// `memento-storage` only classifies; `memento-sync`'s coordinator is the layer
    /// that actually decides retry vs surface.
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::Database | ErrorKind::Transaction | ErrorKind::IO)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Storage error type
#[derive(Debug, Error)]
#[error("[{kind}] {message}")]
pub struct StorageError {
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
    pub kind: ErrorKind,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // Convenience constructors
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Database, message)
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Serialization, message)
    }

    pub fn entity_not_found(entity_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::EntityNotFound,
            format!("entity not found: {}", entity_id.into()),
        )
    }

    pub fn relationship_not_found(relationship_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::RelationshipNotFound,
            format!("relationship not found: {}", relationship_id.into()),
        )
    }

    pub fn checkpoint_not_found(checkpoint_id: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::CheckpointNotFound,
            format!("checkpoint not found: {}", checkpoint_id.into()),
        )
    }

    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::new(
            ErrorKind::DimensionMismatch,
            format!("expected vector of dimension {expected}, got {actual}"),
        )
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transaction, message)
    }

    pub fn constraint(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Constraint, message)
    }
}

// SQLite error conversions
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::database(format!("sqlite error: {}", err)).with_source(err)
    }
}

// JSON error conversions
impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::serialization(format!("json error: {}", err)).with_source(err)
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn test_error_display() {
        let err = StorageError::entity_not_found("sym:a.ts#foo@abc123");
        let msg = format!("{}", err);
        assert!(msg.contains("entity_not_found"));
        assert!(msg.contains("sym:a.ts#foo@abc123"));
    }

    #[test]
    fn test_database_error() {
        let err = StorageError::database("connection failed");
        assert_eq!(err.kind, ErrorKind::Database);
        assert_eq!(err.message, "connection failed");
        assert!(err.source.is_none());

        let msg = format!("{}", err);
        assert_eq!(msg, "[database] connection failed");
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = StorageError::dimension_mismatch(384, 768);
        assert_eq!(err.kind, ErrorKind::DimensionMismatch);
        assert!(err.message.contains("384"));
        assert!(err.message.contains("768"));
    }

    #[test]
    fn test_with_source() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err = StorageError::database("db file missing").with_source(io_err);

        assert_eq!(err.kind, ErrorKind::Database);
        assert!(err.source.is_some());

        let source = err.source().unwrap();
        assert!(source.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_kind_as_str() {
        assert_eq!(ErrorKind::Database.as_str(), "database");
        assert_eq!(ErrorKind::EntityNotFound.as_str(), "entity_not_found");
        assert_eq!(
            ErrorKind::RelationshipNotFound.as_str(),
            "relationship_not_found"
        );
        assert_eq!(ErrorKind::DimensionMismatch.as_str(), "dimension_mismatch");
    }

    #[test]
    fn test_error_kind_transience() {
        assert!(ErrorKind::Database.is_transient());
        assert!(!ErrorKind::Constraint.is_transient());
        assert!(!ErrorKind::EntityNotFound.is_transient());
    }

    #[test]
    fn test_from_rusqlite_error() {
        use rusqlite::Error as SqliteError;

        let sqlite_err = SqliteError::QueryReturnedNoRows;
        let err: StorageError = sqlite_err.into();

        assert_eq!(err.kind, ErrorKind::Database);
        assert!(err.message.contains("sqlite error"));
        assert!(err.source.is_some());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json")
            .err()
            .unwrap();
        let err: StorageError = json_err.into();

        assert_eq!(err.kind, ErrorKind::Serialization);
        assert!(err.message.contains("json error"));
        assert!(err.source.is_some());
    }

    #[test]
    fn test_result_propagation() {
        fn inner() -> Result<()> {
            Err(StorageError::entity_not_found("x"))
        }

        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }

        let result = outer();
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ErrorKind::EntityNotFound);
    }
}

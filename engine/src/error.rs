//! Error types for the Harbor engine.

use crate::{CollectionName, SchemaVersion};
use thiserror::Error;

/// All possible errors from the Harbor engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Validation errors
    #[error("collection not found: {0}")]
    CollectionNotFound(CollectionName),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("object id missing")]
    ObjectIdMissing,

    // Query errors
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("predicate cannot be sent to the remote service: {0}")]
    UnsupportedRemotePredicate(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::CollectionNotFound("books".into());
        assert_eq!(err.to_string(), "collection not found: books");

        let err = Error::SchemaVersionMismatch {
            expected: 1,
            actual: 2,
        };
        assert_eq!(err.to_string(), "schema version mismatch: expected 1, got 2");

        let err = Error::TypeMismatch {
            field: "pages".into(),
            expected: "Int".into(),
            got: "String".into(),
        };
        assert_eq!(
            err.to_string(),
            "type mismatch for field 'pages': expected Int, got String"
        );
    }
}

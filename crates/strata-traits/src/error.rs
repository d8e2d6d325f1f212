//! Error types for trait operations.

use thiserror::Error;

use strata_core::{CoreError, ErrorKind};

/// Common error type for storage collaborator operations.
#[derive(Debug, Error)]
pub enum TraitError {
    /// Requested resource not found
    #[error("not found: {0}")]
    NotFound(String),

    /// Resource already exists
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Invalid input rejected by the store
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Parse/deserialization error
    #[error("parse error: {0}")]
    ParseError(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Database error
    #[error("database error: {0}")]
    DatabaseError(String),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl TraitError {
    /// Returns the classification of this error. Only explicit not-found and
    /// input rejections are classified; everything else is unexpected.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) | Self::AlreadyExists(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Unexpected,
        }
    }
}

impl From<std::io::Error> for TraitError {
    fn from(e: std::io::Error) -> Self {
        TraitError::IoError(e.to_string())
    }
}

impl From<CoreError> for TraitError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound { .. } => TraitError::NotFound(e.to_string()),
            CoreError::InvalidInput(msg) => TraitError::InvalidInput(msg),
            other => TraitError::Internal(other.to_string()),
        }
    }
}

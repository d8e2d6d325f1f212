//! Engine error types.

use thiserror::Error;

use strata_core::{CoreError, ErrorKind};
use strata_traits::TraitError;

/// Engine operation result type.
pub type EngineResult<T> = Result<T, EngineError>;

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Unknown entity
    #[error("{entity} not found: {key}")]
    NotFound {
        /// Entity kind
        entity: &'static str,
        /// Lookup key
        key: String,
    },

    /// Operation not allowed in the current state
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Malformed input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Caller lacks the required permission level
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Storage collaborator failure
    #[error("storage error: {0}")]
    Storage(#[source] TraitError),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Creates a not-found error.
    pub fn not_found(entity: &'static str, key: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    /// Returns the classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::InvalidOperation(_) => ErrorKind::InvalidOperation,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Storage(e) => e.kind(),
            Self::ConfigError(_) | Self::Internal(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<CoreError> for EngineError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::NotFound { entity, key } => EngineError::NotFound { entity, key },
            CoreError::InvalidOperation(msg) => EngineError::InvalidOperation(msg),
            CoreError::InvalidInput(msg) => EngineError::InvalidInput(msg),
            CoreError::PermissionDenied(msg) => EngineError::PermissionDenied(msg),
            CoreError::Unexpected(msg) => EngineError::Internal(msg),
        }
    }
}

impl From<TraitError> for EngineError {
    fn from(e: TraitError) -> Self {
        EngineError::Storage(e)
    }
}

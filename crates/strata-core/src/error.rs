//! Core error types.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core operation result type.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error classification shared by every layer of the engine.
///
/// Transport layers map these onto status codes; the core never decides
/// [`ErrorKind::PermissionDenied`] itself but callers consuming permission
/// levels do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unknown property, value, service type, service version or key.
    NotFound,
    /// Archived value in a mutation path, or a production guard violation.
    InvalidOperation,
    /// Malformed specifiers or variation names.
    InvalidInput,
    /// Caller-side authorization failure.
    PermissionDenied,
    /// Storage or internal failure with no specific classification.
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NotFound => "not_found",
            Self::InvalidOperation => "invalid_operation",
            Self::InvalidInput => "invalid_input",
            Self::PermissionDenied => "permission_denied",
            Self::Unexpected => "unexpected",
        };
        f.write_str(s)
    }
}

/// Core error types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// Entity not found.
    #[error("{entity} not found: {key}")]
    NotFound {
        /// The kind of entity (e.g. "variation property").
        entity: &'static str,
        /// The key that was looked up.
        key: String,
    },

    /// The operation is not allowed in the current state.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The input is malformed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Authorization failure.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Internal failure.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl CoreError {
    /// Creates a not-found error for the given entity kind and key.
    pub fn not_found(entity: &'static str, key: impl fmt::Display) -> Self {
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
            Self::Unexpected(_) => ErrorKind::Unexpected,
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Unexpected(format!("json: {err}"))
    }
}

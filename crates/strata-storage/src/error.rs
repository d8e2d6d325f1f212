//! Storage error types.

use thiserror::Error;

use strata_traits::TraitError;

/// Storage operation result type.
pub type StorageResult<T> = Result<T, StorageError>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database error from the underlying storage engine.
    #[error("Database error: {0}")]
    Database(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Record not found.
    #[error("Record not found: {entity_type} with key '{key}'")]
    NotFound {
        /// The type of entity (e.g., "variation value", "changeset").
        entity_type: &'static str,
        /// The key that was not found.
        key: String,
    },

    /// Duplicate key error.
    #[error("Duplicate key: {entity_type} with key '{key}' already exists")]
    DuplicateKey {
        /// The type of entity.
        entity_type: &'static str,
        /// The duplicate key.
        key: String,
    },

    /// A referenced record exists but violates a relationship constraint.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Creates a not-found error.
    pub fn not_found(entity_type: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            entity_type,
            key: key.to_string(),
        }
    }

    /// Creates a duplicate-key error.
    pub fn duplicate(entity_type: &'static str, key: impl ToString) -> Self {
        Self::DuplicateKey {
            entity_type,
            key: key.to_string(),
        }
    }
}

impl From<redb::Error> for StorageError {
    fn from(err: redb::Error) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(err: redb::DatabaseError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TableError> for StorageError {
    fn from(err: redb::TableError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(err: redb::TransactionError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(err: redb::CommitError) -> Self {
        StorageError::Transaction(err.to_string())
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(err: redb::StorageError) -> Self {
        StorageError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() {
            StorageError::Deserialization(err.to_string())
        } else {
            StorageError::Serialization(err.to_string())
        }
    }
}

impl From<StorageError> for TraitError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => TraitError::NotFound(err.to_string()),
            StorageError::DuplicateKey { .. } => TraitError::AlreadyExists(err.to_string()),
            StorageError::Constraint(msg) => TraitError::InvalidInput(msg),
            StorageError::Serialization(msg) => TraitError::SerializationError(msg),
            StorageError::Deserialization(msg) => TraitError::ParseError(msg),
            StorageError::Io(e) => TraitError::IoError(e.to_string()),
            StorageError::Database(msg) | StorageError::Transaction(msg) => {
                TraitError::DatabaseError(msg)
            }
        }
    }
}

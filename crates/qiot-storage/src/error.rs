//! Error types for the storage crate.

use thiserror::Error;

pub use qiot_core::error::Error as QiotError;

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage error types.
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage/Database error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// An id is not a valid object id.
    #[error("Malformed id '{id}': {reason}")]
    MalformedId { id: String, reason: String },

    /// A document with the same id already exists.
    #[error("Duplicate id: {0}")]
    Duplicate(String),

    /// A document is not usable as stored.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
}

// Convert to QiotError
impl From<StorageError> for QiotError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Io(e) => QiotError::Storage(e.to_string()),
            StorageError::Serialization(s) => QiotError::Serialization(s),
            StorageError::Storage(s) => QiotError::Storage(s),
            StorageError::MalformedId { id, reason } => QiotError::MalformedId { id, reason },
            StorageError::Duplicate(id) => QiotError::Storage(format!("duplicate id {}", id)),
            StorageError::InvalidDocument(s) => QiotError::InvalidDocument(s),
        }
    }
}

// External error conversions
impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}

impl From<redb::Error> for StorageError {
    fn from(e: redb::Error) -> Self {
        StorageError::Storage(format!("Redb error: {}", e))
    }
}

impl From<redb::TransactionError> for StorageError {
    fn from(e: redb::TransactionError) -> Self {
        StorageError::Storage(format!("Redb transaction error: {}", e))
    }
}

impl From<redb::TableError> for StorageError {
    fn from(e: redb::TableError) -> Self {
        StorageError::Storage(format!("Redb table error: {}", e))
    }
}

impl From<redb::StorageError> for StorageError {
    fn from(e: redb::StorageError) -> Self {
        StorageError::Storage(format!("Redb storage error: {}", e))
    }
}

impl From<redb::CommitError> for StorageError {
    fn from(e: redb::CommitError) -> Self {
        StorageError::Storage(format!("Redb commit error: {}", e))
    }
}

impl From<redb::DatabaseError> for StorageError {
    fn from(e: redb::DatabaseError) -> Self {
        StorageError::Storage(format!("Redb database error: {}", e))
    }
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Storage(format!("Task join error: {}", e))
    }
}

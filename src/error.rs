//! Error types for the table store.

use thiserror::Error;

/// Main error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No rows found in table {table}")]
    NotFound { table: String },

    #[error("Duplicate key in table {table}: {constraint} = {key}")]
    Conflict {
        table: String,
        constraint: String,
        key: String,
    },

    #[error("Missing required field {field} in table {table}")]
    Validation { table: String, field: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),

    #[error("Unsupported schema version {found} for {key} (supported: {supported})")]
    UnsupportedVersion {
        key: String,
        found: u32,
        supported: u32,
    },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,
}

/// Coarse error taxonomy exposed to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single-row query matched nothing.
    NotFound,
    /// A declared uniqueness constraint would be violated.
    Conflict,
    /// Caller input is missing a required field.
    Validation,
    /// Durability layer fault (IO, encoding, corruption, locking).
    Storage,
}

impl StoreError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::NotFound { .. } => ErrorKind::NotFound,
            StoreError::Conflict { .. } => ErrorKind::Conflict,
            StoreError::Validation { .. } => ErrorKind::Validation,
            _ => ErrorKind::Storage,
        }
    }

    /// Stable error code, matching the codes the hosted backend reports.
    pub fn code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::NotFound => "PGRST116",
            ErrorKind::Conflict => "23505",
            ErrorKind::Validation => "23502",
            ErrorKind::Storage => "STORAGE",
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

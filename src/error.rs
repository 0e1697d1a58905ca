//! Error types for shardtable
//!
//! Provides a unified error type for all operations. Errors are `Clone`
//! because one backend failure is delivered to every operation of the
//! batch or query group that hit it.

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for shardtable operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    /// Record shape without a key field, invalid shard count, ...
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Encoding Errors
    // -------------------------------------------------------------------------
    /// Unsupported field type, truncated value bytes, malformed row key
    #[error("Encoding error: {0}")]
    Encoding(String),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    /// A batch write or query page call failed (network, quota, conflict)
    #[error("Backend error on partition {partition}: {message}")]
    Backend { partition: u64, message: String },

    /// Raised by the table service itself, before a partition is attached
    #[error("Table service error: {0}")]
    Service(String),

    #[error("Key not found")]
    NotFound,

    // -------------------------------------------------------------------------
    // Logic Errors
    // -------------------------------------------------------------------------
    /// Dropped/double-settled operation, key-type/stored-bytes mismatch
    #[error("Logic error: {0}")]
    Logic(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Store has been shut down")]
    ShutDown,

    /// Background worker could not be started
    #[error("Runtime error: {0}")]
    Runtime(String),
}

impl StoreError {
    /// Attach a partition to a service error raised during a drain cycle
    pub fn in_partition(self, partition: u64) -> Self {
        match self {
            StoreError::Service(message) => StoreError::Backend { partition, message },
            other => other,
        }
    }

    /// True for failures reported by the table service
    pub fn is_backend(&self) -> bool {
        matches!(self, StoreError::Backend { .. } | StoreError::Service(_))
    }
}

//! Error types for checkpoint operations

use thiserror::Error;

/// Result type for checkpoint operations
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur during checkpoint operations
#[derive(Error, Debug)]
pub enum CheckpointError {
    /// A save did not extend the thread's history by exactly one version.
    ///
    /// Two writers raced on the same thread, or a caller tried to rewrite
    /// history. The stored lineage is left untouched.
    #[error("Version conflict on thread '{thread_id}': expected version {expected}, got {found}")]
    VersionConflict {
        thread_id: String,
        expected: u64,
        found: u64,
    },

    /// Stored data exists but cannot be decoded
    #[error("Corrupt checkpoint data for thread '{thread_id}': {reason}")]
    Corrupt { thread_id: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization error
    #[error("Binary serialization error: {0}")]
    BinarySerialization(#[from] bincode::Error),

    /// Invalid checkpoint
    #[error("Invalid checkpoint: {0}")]
    Invalid(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckpointError {
    pub fn corrupt(thread_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            thread_id: thread_id.into(),
            reason: reason.into(),
        }
    }
}

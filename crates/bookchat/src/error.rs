//! Error types for the kernel.

use bookchat_core::{CoreError, IdentityError, RecordId, SignatureError, ValidationError};
use bookchat_store::StoreError;
use thiserror::Error;

/// Errors that can occur during kernel operations.
#[derive(Debug, Error)]
pub enum KernelError {
    /// Key or signature error.
    #[error("crypto error: {0}")]
    Core(#[from] CoreError),

    /// Structural error; the record was not appended.
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Identity binding error.
    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Record not found.
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    /// The record's chain link does not match its predecessor.
    #[error("integrity violation at position {position}")]
    IntegrityViolation { position: u64 },

    /// The store already holds a different record at this position.
    #[error("conflict at position {position}: existing record {existing}")]
    Conflict { position: u64, existing: RecordId },

    /// A cancellable operation was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// A lock guarding shared state was poisoned.
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    /// A spawned task panicked or was aborted.
    #[error("task failed: {0}")]
    Task(String),

    /// Bad configuration value.
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<SignatureError> for KernelError {
    fn from(e: SignatureError) -> Self {
        KernelError::Core(e.into())
    }
}

/// Result type for kernel operations.
pub type Result<T> = std::result::Result<T, KernelError>;

//! Error types for ctxcell operations

use thiserror::Error;

/// Store-level errors.
///
/// Keys are rendered with their `Debug` form so the error stays independent
/// of the store's key type.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Collision detected: key {key} already has a slot")]
    Collision { key: String },

    #[error("Concurrent access: key {key} is claimed by an in-flight computation")]
    ConcurrentAccess { key: String },

    #[error("Compute exhausted for key {key} after {attempts} attempt(s): {last_error}")]
    ComputeExhausted {
        key: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Required value not found: {key}")]
    NotFound { key: String },

    #[error("Store has been cleared")]
    Cleared,

    #[error("Store lock poisoned")]
    LockPoisoned,
}

impl StoreError {
    pub(crate) fn collision(key: &impl std::fmt::Debug) -> Self {
        StoreError::Collision {
            key: format!("{:?}", key),
        }
    }

    pub(crate) fn concurrent_access(key: &impl std::fmt::Debug) -> Self {
        StoreError::ConcurrentAccess {
            key: format!("{:?}", key),
        }
    }

    pub(crate) fn not_found(key: &impl std::fmt::Debug) -> Self {
        StoreError::NotFound {
            key: format!("{:?}", key),
        }
    }

    /// The scope can no longer produce a value for this key.
    ///
    /// Only retry exhaustion is fatal; the slot it leaves behind stays claimed
    /// for the rest of the store's lifetime.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StoreError::ComputeExhausted { .. })
    }

    /// The caller broke the store's usage contract (double write, racing the
    /// same key, missing seed, use after clear).
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            StoreError::Collision { .. }
                | StoreError::ConcurrentAccess { .. }
                | StoreError::NotFound { .. }
                | StoreError::Cleared
        )
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all ctxcell errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CtxError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for ctxcell operations.
pub type CtxResult<T> = Result<T, CtxError>;

// =============================================================================
// TESTS
// =============================================================================

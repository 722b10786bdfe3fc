//! Error types for request scopes

use ctxcell_core::{ConfigError, CtxError, StoreError};
use thiserror::Error;

use crate::key::ScopeKey;

/// Request scope errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ScopeError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Request context is not attached to this request")]
    MissingContext,

    #[error("Value under {key} has an unexpected type")]
    TypeMismatch { key: String },

    #[error("Failed to encode {key}: {reason}")]
    Encode { key: String, reason: String },

    #[error("Failed to decode {key}: {reason}")]
    Decode { key: String, reason: String },
}

impl From<CtxError> for ScopeError {
    fn from(err: CtxError) -> Self {
        match err {
            CtxError::Store(e) => ScopeError::Store(e),
            CtxError::Config(e) => ScopeError::Config(e),
        }
    }
}

impl ScopeError {
    pub(crate) fn type_mismatch(key: &ScopeKey) -> Self {
        ScopeError::TypeMismatch {
            key: key.to_string(),
        }
    }

    /// A reserved value the adapter seeds was missing: the context was built
    /// without seeding, or used after it finished.
    pub fn is_missing_seed(&self) -> bool {
        matches!(
            self,
            ScopeError::Store(StoreError::NotFound { .. }) | ScopeError::MissingContext
        )
    }
}

/// Query string parse errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("invalid URL escape {escape:?} at byte {offset}")]
    InvalidEscape { escape: String, offset: usize },

    #[error("invalid semicolon separator in query")]
    Semicolon,

    #[error("URL escape at byte {offset} does not decode to UTF-8")]
    InvalidUtf8 { offset: usize },
}

/// Result type alias for request scope operations.
pub type ScopeResult<T> = Result<T, ScopeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_error_from_store_error() {
        let err = ScopeError::from(StoreError::Cleared);
        assert!(matches!(err, ScopeError::Store(StoreError::Cleared)));
        assert!(format!("{}", err).contains("cleared"));
    }

    #[test]
    fn test_scope_error_flattens_ctx_error() {
        let err = ScopeError::from(CtxError::Store(StoreError::LockPoisoned));
        assert_eq!(err, ScopeError::Store(StoreError::LockPoisoned));
    }

    #[test]
    fn test_missing_seed_classification() {
        let not_found = ScopeError::from(StoreError::NotFound {
            key: "Request".to_string(),
        });
        assert!(not_found.is_missing_seed());
        assert!(ScopeError::MissingContext.is_missing_seed());
        assert!(!ScopeError::type_mismatch(&ScopeKey::Title).is_missing_seed());
    }

    #[test]
    fn test_query_error_display() {
        let err = QueryError::InvalidEscape {
            escape: "%zz".to_string(),
            offset: 2,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("%zz"));
        assert!(msg.contains("byte 2"));
    }
}

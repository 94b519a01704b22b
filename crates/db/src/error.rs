use lockledger_core::error::CoreError;

/// Error type for coordinator operations.
///
/// Wraps [`CoreError`] for validation and invariant failures and keeps
/// store errors as the underlying [`sqlx::Error`], so callers can decide on
/// retries themselves.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    /// A domain-level error from `lockledger_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A connection or statement failure from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The caller abandoned the operation before the store answered.
    #[error("Operation cancelled")]
    Cancelled,
}

/// Convenience alias for coordinator results.
pub type LockResult<T> = Result<T, LockError>;

impl LockError {
    pub(crate) fn invariant(message: impl Into<String>) -> Self {
        LockError::Core(CoreError::InvariantViolation(message.into()))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, LockError::Core(CoreError::Validation(_)))
    }

    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, LockError::Core(CoreError::InvariantViolation(_)))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, LockError::Cancelled)
    }
}

impl From<validator::ValidationErrors> for LockError {
    fn from(errors: validator::ValidationErrors) -> Self {
        LockError::Core(CoreError::from(errors))
    }
}

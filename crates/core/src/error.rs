#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    /// Caller input was rejected before touching the store.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A write that must produce a row produced none. Indicates a bug in the
    /// assignment statements, never an environmental failure.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<validator::ValidationErrors> for CoreError {
    fn from(errors: validator::ValidationErrors) -> Self {
        CoreError::Validation(errors.to_string())
    }
}

//! Input checks applied before any store access.

use validator::ValidationError;

use crate::error::CoreError;

/// Reject empty or whitespace-only identifiers.
///
/// Resource and requester names are otherwise taken verbatim: they are
/// case-sensitive and are not trimmed.
pub fn validate_identifier(field: &str, value: &str) -> Result<(), CoreError> {
    if value.trim().is_empty() {
        return Err(CoreError::Validation(format!("{field} must not be empty")));
    }
    Ok(())
}

/// `validator` adapter for [`validate_identifier`], used on DTO fields.
pub fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        let mut err = ValidationError::new("blank");
        err.message = Some("must not be empty".into());
        return Err(err);
    }
    Ok(())
}

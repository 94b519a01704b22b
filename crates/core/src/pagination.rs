//! Paging and sorting for the administrative lock listing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Default number of ledger rows per page.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// Maximum number of ledger rows per page.
pub const MAX_PAGE_SIZE: i64 = 500;

/// Clamp a user-provided limit to valid bounds.
pub fn clamp_limit(limit: Option<i64>, default: i64, max: i64) -> i64 {
    limit.unwrap_or(default).max(1).min(max)
}

/// Clamp a 1-based page number; anything below 1 becomes 1.
pub fn clamp_page(page: Option<i64>) -> i64 {
    page.unwrap_or(1).max(1)
}

/// Row offset of a 1-based page.
pub fn page_offset(page: i64, page_size: i64) -> i64 {
    (page.max(1) - 1).saturating_mul(page_size)
}

// ---------------------------------------------------------------------------
// Sort column
// ---------------------------------------------------------------------------

/// Columns the lock listing may be ordered by.
///
/// Only these names ever reach the `ORDER BY` clause.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockSortColumn {
    #[default]
    Resource,
    LockedBy,
    ExpiryDate,
    LockedAt,
    LastLockDate,
}

impl LockSortColumn {
    pub const ALL: [LockSortColumn; 5] = [
        LockSortColumn::Resource,
        LockSortColumn::LockedBy,
        LockSortColumn::ExpiryDate,
        LockSortColumn::LockedAt,
        LockSortColumn::LastLockDate,
    ];

    /// Column name in the `locks` table.
    pub fn column_name(self) -> &'static str {
        match self {
            LockSortColumn::Resource => "resource",
            LockSortColumn::LockedBy => "locked_by",
            LockSortColumn::ExpiryDate => "expiry_date",
            LockSortColumn::LockedAt => "locked_at",
            LockSortColumn::LastLockDate => "last_lock_date",
        }
    }
}

impl fmt::Display for LockSortColumn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

impl FromStr for LockSortColumn {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        Self::ALL
            .into_iter()
            .find(|col| col.column_name().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| {
                let valid: Vec<&str> = Self::ALL.iter().map(|c| c.column_name()).collect();
                CoreError::Validation(format!(
                    "Unknown sort column '{s}', expected one of: {}",
                    valid.join(", ")
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

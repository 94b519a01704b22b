//! Lock ledger entity and listing DTOs.

use chrono::{DateTime, Local};
use lockledger_core::lease;
use lockledger_core::pagination::LockSortColumn;
use lockledger_core::time::to_local;
use lockledger_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A row from the `locks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Lock {
    pub resource: String,
    pub locked_by: Option<String>,
    pub expiry_date: Option<Timestamp>,
    pub locked_at: Timestamp,
    pub last_lock_date: Timestamp,
    /// Live queue rows for this resource. Only filled when the read asked
    /// for the count; `None` otherwise.
    #[sqlx(default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending_requests: Option<i64>,
}

impl Lock {
    /// Whether `requester` holds an unexpired lease on this row at `now`.
    pub fn is_held_by(&self, requester: &str, now: Timestamp) -> bool {
        lease::is_held_by(self.locked_by.as_deref(), self.expiry_date, requester, now)
    }

    /// Whether `requester` could take this lock at `now`.
    pub fn is_effectively_free_for(&self, requester: &str, now: Timestamp) -> bool {
        lease::is_effectively_free(self.locked_by.as_deref(), self.expiry_date, requester, now)
    }

    pub fn expiry_date_local(&self) -> Option<DateTime<Local>> {
        self.expiry_date.map(to_local)
    }

    pub fn locked_at_local(&self) -> DateTime<Local> {
        to_local(self.locked_at)
    }
}

// ---------------------------------------------------------------------------
// Read options
// ---------------------------------------------------------------------------

/// Flags for a point lookup of a ledger row.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetLockOptions {
    /// Fill [`Lock::pending_requests`] with the live queue length.
    pub count_requests: bool,
    /// Hold a row-level write lock until the transaction ends.
    pub for_update: bool,
}

// ---------------------------------------------------------------------------
// Listing
// ---------------------------------------------------------------------------

/// Filter, paging and ordering for the administrative listing.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LockSearchParams {
    /// Case-sensitive substring of `resource`. Empty means no filter.
    pub filter: Option<String>,
    /// 1-based page number. Defaults to 1.
    pub page: Option<i64>,
    /// Rows per page. Defaults to 50, capped at 500.
    pub page_size: Option<i64>,
    /// Defaults to `resource`.
    pub sort: Option<LockSortColumn>,
    #[serde(default)]
    pub sort_descending: bool,
}

/// One page of ledger rows plus the total number of matches.
#[derive(Debug, Clone, Serialize)]
pub struct LockPage {
    pub items: Vec<Lock>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

impl LockPage {
    pub fn total_pages(&self) -> i64 {
        if self.page_size <= 0 {
            return 0;
        }
        (self.total + self.page_size - 1) / self.page_size
    }
}

//! Wait queue entity and enqueue DTO.

use chrono::{DateTime, TimeZone};
use lockledger_core::lease::QueuedCandidate;
use lockledger_core::time::to_utc;
use lockledger_core::types::{DbId, Timestamp};
use lockledger_core::validation::not_blank;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `lock_requests` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LockRequest {
    pub id: DbId,
    pub resource: String,
    pub requester: String,
    pub created_at: Timestamp,
    /// When the wait itself gives up. `None` waits forever.
    pub timeout: Option<Timestamp>,
    /// Lease length granted if this request wins. Not the same as `timeout`.
    pub expiry_time_secs: Option<i32>,
}

impl LockRequest {
    pub fn as_candidate(&self) -> QueuedCandidate<'_> {
        QueuedCandidate {
            id: self.id,
            requester: &self.requester,
            expiry_time_secs: self.expiry_time_secs,
        }
    }
}

/// DTO for adding a waiter to the queue.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateLockRequest {
    #[validate(custom(function = "not_blank"))]
    pub resource: String,
    #[validate(custom(function = "not_blank"))]
    pub requester: String,
    pub timeout: Option<Timestamp>,
    #[validate(range(min = 0))]
    pub expiry_time_secs: Option<i32>,
}

impl CreateLockRequest {
    pub fn new(resource: impl Into<String>, requester: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            requester: requester.into(),
            timeout: None,
            expiry_time_secs: None,
        }
    }

    /// Give up waiting at `timeout`, in any zone; stored as UTC.
    pub fn with_timeout<Tz: TimeZone>(mut self, timeout: DateTime<Tz>) -> Self {
        self.timeout = Some(to_utc(timeout));
        self
    }

    pub fn with_expiry_time_secs(mut self, secs: i32) -> Self {
        self.expiry_time_secs = Some(secs);
        self
    }
}

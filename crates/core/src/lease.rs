//! Lease and queue rules evaluated under the resource's row lock.
//!
//! Expiry is lazy: nothing rewrites an expired ledger row or a timed-out
//! request. Every decision is made against a single `now` supplied by the
//! caller, so one acquisition attempt sees one consistent instant.

use chrono::TimeDelta;

use crate::types::{DbId, Timestamp};

/// Whether a lease deadline has passed.
///
/// A `None` deadline never expires on its own.
pub fn is_expired(expiry_date: Option<Timestamp>, now: Timestamp) -> bool {
    matches!(expiry_date, Some(deadline) if deadline < now)
}

/// Whether `requester` may take the lock right now.
///
/// A ledger row is effectively free when nobody holds it, when the holder
/// is `requester` itself (re-acquisition), or when the lease has expired.
pub fn is_effectively_free(
    locked_by: Option<&str>,
    expiry_date: Option<Timestamp>,
    requester: &str,
    now: Timestamp,
) -> bool {
    match locked_by {
        None => true,
        Some(holder) if holder == requester => true,
        Some(_) => is_expired(expiry_date, now),
    }
}

/// Whether `requester` currently owns a valid lease.
pub fn is_held_by(
    locked_by: Option<&str>,
    expiry_date: Option<Timestamp>,
    requester: &str,
    now: Timestamp,
) -> bool {
    locked_by == Some(requester) && expiry_date.map_or(true, |deadline| deadline > now)
}

/// Whether a queued request can still win.
pub fn is_live_request(timeout: Option<Timestamp>, now: Timestamp) -> bool {
    timeout.map_or(true, |deadline| deadline > now)
}

/// Lease deadline granted to a queued request that wins at `now`.
pub fn lease_deadline(now: Timestamp, expiry_time_secs: Option<i32>) -> Option<Timestamp> {
    expiry_time_secs.map(|secs| now + TimeDelta::seconds(i64::from(secs)))
}

// ---------------------------------------------------------------------------
// Assignment decision
// ---------------------------------------------------------------------------

/// The oldest live queue row for a resource, as seen by the decision.
#[derive(Debug, Clone, Copy)]
pub struct QueuedCandidate<'a> {
    pub id: DbId,
    pub requester: &'a str,
    pub expiry_time_secs: Option<i32>,
}

/// Where the winner of a free lock came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentSource {
    /// The caller of `try_acquire`.
    Caller,
    /// A waiter that was ahead of the caller in the queue.
    Queue { request_id: DbId },
}

/// New holder and lease for a ledger row that is effectively free.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub locked_by: String,
    pub expiry_date: Option<Timestamp>,
    pub source: AssignmentSource,
}

impl Assignment {
    pub fn is_from_queue(&self) -> bool {
        matches!(self.source, AssignmentSource::Queue { .. })
    }
}

/// Pick the holder of a free lock.
///
/// A live waiter always beats the caller; its lease is measured from `now`.
/// With an empty queue the caller wins with the deadline it asked for.
pub fn choose_assignment(
    caller: &str,
    caller_expiry: Option<Timestamp>,
    oldest_live: Option<QueuedCandidate<'_>>,
    now: Timestamp,
) -> Assignment {
    match oldest_live {
        Some(candidate) => Assignment {
            locked_by: candidate.requester.to_string(),
            expiry_date: lease_deadline(now, candidate.expiry_time_secs),
            source: AssignmentSource::Queue {
                request_id: candidate.id,
            },
        },
        None => Assignment {
            locked_by: caller.to_string(),
            expiry_date: caller_expiry,
            source: AssignmentSource::Caller,
        },
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

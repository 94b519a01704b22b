//! UTC normalization at the API boundary.
//!
//! Everything stored or compared is UTC. Callers may hand in any offset and
//! convert results back to local time; the conversion never happens inside
//! the assignment logic.

use chrono::{DateTime, Local, TimeZone, Utc};

use crate::types::Timestamp;

/// Normalize a timestamp in any zone to UTC.
pub fn to_utc<Tz: TimeZone>(value: DateTime<Tz>) -> Timestamp {
    value.with_timezone(&Utc)
}

/// Render a stored timestamp in the process's local zone.
pub fn to_local(value: Timestamp) -> DateTime<Local> {
    value.with_timezone(&Local)
}

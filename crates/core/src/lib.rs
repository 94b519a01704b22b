//! Domain logic for the lock ledger.
//!
//! This crate has no database or runtime dependencies. It holds the rules
//! the coordinator applies under a row lock (lease expiry, request
//! liveness, who wins a freed lock) plus the shared validation, paging and
//! time helpers, so they can be unit tested without PostgreSQL.

pub mod error;
pub mod lease;
pub mod pagination;
pub mod time;
pub mod types;
pub mod validation;

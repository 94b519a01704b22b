//! How a ledger write hands back the row it produced.
//!
//! Both strategies run the same statements in the same order. They differ
//! only in whether the written row comes back from the write itself
//! (`RETURNING`) or from a follow-up `SELECT` in the same transaction.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use lockledger_core::error::CoreError;
use lockledger_core::lease::Assignment;
use lockledger_core::types::Timestamp;
use sqlx::PgConnection;

use crate::error::{LockError, LockResult};
use crate::models::lock::Lock;
use crate::repositories::LockRepo;

// ---------------------------------------------------------------------------
// Strategy selection
// ---------------------------------------------------------------------------

/// The two interchangeable ways of executing ledger writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStrategy {
    /// Write, then read the row back with a separate statement.
    TwoPhase,
    /// Write and return the row in one round trip.
    Returning,
}

impl ExecutionStrategy {
    /// Pick a strategy for a store.
    ///
    /// A preference for `Returning` is dropped if the store cannot return
    /// written rows.
    pub fn for_store(caps: StoreCapabilities, preferred: Option<ExecutionStrategy>) -> Self {
        match (preferred, caps.supports_returning) {
            (Some(ExecutionStrategy::TwoPhase), _) => ExecutionStrategy::TwoPhase,
            (_, true) => ExecutionStrategy::Returning,
            (Some(ExecutionStrategy::Returning), false) => {
                tracing::warn!("Store cannot return written rows, falling back to two-phase writes");
                ExecutionStrategy::TwoPhase
            }
            (None, false) => ExecutionStrategy::TwoPhase,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStrategy::TwoPhase => "two-phase",
            ExecutionStrategy::Returning => "returning",
        }
    }
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "two-phase" | "two_phase" | "twophase" => Ok(ExecutionStrategy::TwoPhase),
            "returning" | "single-phase" | "single_phase" => Ok(ExecutionStrategy::Returning),
            other => Err(CoreError::Validation(format!(
                "Unknown execution strategy '{other}', expected 'two-phase' or 'returning'"
            ))),
        }
    }
}

/// What the backing store can do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreCapabilities {
    /// `INSERT`/`UPDATE ... RETURNING` is available.
    pub supports_returning: bool,
}

impl StoreCapabilities {
    pub const POSTGRES: StoreCapabilities = StoreCapabilities {
        supports_returning: true,
    };
}

// ---------------------------------------------------------------------------
// Write strategy trait
// ---------------------------------------------------------------------------

/// Ledger writes that surface the resulting row.
#[async_trait]
pub trait WriteStrategy: Send + Sync {
    fn kind(&self) -> ExecutionStrategy;

    /// Create the ledger row for a resource seen for the first time.
    ///
    /// Returns `None` when the row already exists.
    async fn insert_if_absent(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        locked_by: &str,
        expiry_date: Option<Timestamp>,
        now: Timestamp,
    ) -> LockResult<Option<Lock>>;

    /// Apply an assignment to an existing, already row-locked ledger row.
    ///
    /// The row is known to exist, so producing nothing is an invariant
    /// violation.
    async fn assign(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        assignment: &Assignment,
        now: Timestamp,
    ) -> LockResult<Lock>;
}

fn missing_after_write(resource: &str, write: &str) -> LockError {
    LockError::invariant(format!("{write} of lock '{resource}' produced no row"))
}

// ---------------------------------------------------------------------------
// Two-phase
// ---------------------------------------------------------------------------

/// Write with `execute`, then `SELECT` the row.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwoPhaseWrites;

#[async_trait]
impl WriteStrategy for TwoPhaseWrites {
    fn kind(&self) -> ExecutionStrategy {
        ExecutionStrategy::TwoPhase
    }

    async fn insert_if_absent(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        locked_by: &str,
        expiry_date: Option<Timestamp>,
        now: Timestamp,
    ) -> LockResult<Option<Lock>> {
        if !LockRepo::insert_if_absent(&mut *conn, resource, locked_by, expiry_date, now).await? {
            return Ok(None);
        }
        let row = LockRepo::find(conn, resource, None, false)
            .await?
            .ok_or_else(|| missing_after_write(resource, "insert"))?;
        Ok(Some(row))
    }

    async fn assign(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        assignment: &Assignment,
        now: Timestamp,
    ) -> LockResult<Lock> {
        let updated = LockRepo::assign(
            &mut *conn,
            resource,
            &assignment.locked_by,
            assignment.expiry_date,
            now,
        )
        .await?;
        if !updated {
            return Err(missing_after_write(resource, "assignment"));
        }
        LockRepo::find(conn, resource, None, false)
            .await?
            .ok_or_else(|| missing_after_write(resource, "assignment"))
    }
}

// ---------------------------------------------------------------------------
// Single-phase
// ---------------------------------------------------------------------------

/// Write with `RETURNING`, no follow-up read.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturningWrites;

#[async_trait]
impl WriteStrategy for ReturningWrites {
    fn kind(&self) -> ExecutionStrategy {
        ExecutionStrategy::Returning
    }

    async fn insert_if_absent(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        locked_by: &str,
        expiry_date: Option<Timestamp>,
        now: Timestamp,
    ) -> LockResult<Option<Lock>> {
        Ok(LockRepo::insert_if_absent_returning(conn, resource, locked_by, expiry_date, now).await?)
    }

    async fn assign(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        assignment: &Assignment,
        now: Timestamp,
    ) -> LockResult<Lock> {
        LockRepo::assign_returning(
            conn,
            resource,
            &assignment.locked_by,
            assignment.expiry_date,
            now,
        )
        .await?
        .ok_or_else(|| missing_after_write(resource, "assignment"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

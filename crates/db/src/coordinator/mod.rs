//! The lock coordinator: acquisition, queueing and reads over the ledger.
//!
//! Every operation runs on a connection the caller owns, normally `&mut *tx`
//! for an open transaction. The coordinator keeps no state between calls;
//! all serialization comes from PostgreSQL row locks on the resource's
//! ledger row and queue rows. Commit or rollback stays with the caller.
//!
//! ```rust,no_run
//! use lockledger_db::{coordinator_for, ExecutionStrategy};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(pool: lockledger_db::DbPool) -> lockledger_db::LockResult<()> {
//! let coordinator = coordinator_for(ExecutionStrategy::Returning);
//! let cancel = CancellationToken::new();
//!
//! let mut tx = pool.begin().await?;
//! let lock = coordinator
//!     .try_acquire(&mut *tx, "job-42", "worker-1", None, &cancel)
//!     .await?;
//! tx.commit().await?;
//!
//! // The holder may be a queued waiter rather than the caller.
//! let won = lock.locked_by.as_deref() == Some("worker-1");
//! # let _ = won;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use lockledger_core::types::{DbId, Timestamp};
use sqlx::PgConnection;
use tokio_util::sync::CancellationToken;

use crate::error::{LockError, LockResult};
use crate::models::lock::{Lock, LockPage, LockSearchParams};
use crate::models::lock_request::{CreateLockRequest, LockRequest};

mod pg;
pub mod strategy;

pub use crate::models::lock::GetLockOptions;
pub use pg::PgLockCoordinator;
pub use strategy::{ExecutionStrategy, ReturningWrites, StoreCapabilities, TwoPhaseWrites, WriteStrategy};

/// Contract exposed to services that coordinate through the lock ledger.
///
/// All timestamps are UTC; use `lockledger_core::time` to convert at the
/// edge. Every call accepts a [`CancellationToken`]. Cancelling it drops the
/// in-flight statement and returns [`LockError::Cancelled`]; the
/// transaction must then be rolled back.
#[async_trait]
pub trait LockCoordinator: Send + Sync {
    /// Which write strategy this coordinator executes with.
    fn strategy(&self) -> ExecutionStrategy;

    /// Try to make `requester` the holder of `resource`.
    ///
    /// Always returns the ledger row as it stands after the call. The holder
    /// may be `requester`, an older waiter from the queue that was promoted
    /// instead, or the unchanged current holder. Inspect `locked_by`.
    async fn try_acquire(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        requester: &str,
        expiry: Option<Timestamp>,
        cancel: &CancellationToken,
    ) -> LockResult<Lock>;

    /// Append a waiter to the resource's queue.
    async fn enqueue_request(
        &self,
        conn: &mut PgConnection,
        request: &CreateLockRequest,
        cancel: &CancellationToken,
    ) -> LockResult<LockRequest>;

    /// Read a ledger row. `Ok(None)` means the resource was never acquired.
    async fn get_lock(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        options: GetLockOptions,
        cancel: &CancellationToken,
    ) -> LockResult<Option<Lock>>;

    /// Paged administrative listing of ledger rows.
    async fn search(
        &self,
        conn: &mut PgConnection,
        params: &LockSearchParams,
        cancel: &CancellationToken,
    ) -> LockResult<LockPage>;

    /// Give up a lock held by `requester`. Returns `false` if it was not
    /// the holder.
    async fn release(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        requester: &str,
        cancel: &CancellationToken,
    ) -> LockResult<bool>;

    /// Withdraw a queued request. Returns `false` if it no longer exists.
    async fn cancel_request(
        &self,
        conn: &mut PgConnection,
        request_id: DbId,
        cancel: &CancellationToken,
    ) -> LockResult<bool>;

    /// Live queued requests for `resource`, oldest first.
    async fn list_requests(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        cancel: &CancellationToken,
    ) -> LockResult<Vec<LockRequest>>;
}

/// Build the coordinator for a strategy.
pub fn coordinator_for(strategy: ExecutionStrategy) -> Arc<dyn LockCoordinator> {
    match strategy {
        ExecutionStrategy::TwoPhase => Arc::new(PgLockCoordinator::two_phase()),
        ExecutionStrategy::Returning => Arc::new(PgLockCoordinator::returning()),
    }
}

/// Race `work` against `cancel`.
///
/// An already-cancelled token wins without polling `work`, so no statement
/// is sent.
pub(crate) async fn cancellable<T, F>(cancel: &CancellationToken, work: F) -> LockResult<T>
where
    F: Future<Output = LockResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LockError::Cancelled),
        result = work => result,
    }
}

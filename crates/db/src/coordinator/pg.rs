//! PostgreSQL implementation of [`LockCoordinator`].

use async_trait::async_trait;
use chrono::Utc;
use lockledger_core::lease::choose_assignment;
use lockledger_core::pagination::{
    clamp_limit, clamp_page, page_offset, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};
use lockledger_core::types::{DbId, Timestamp};
use lockledger_core::validation::validate_identifier;
use sqlx::PgConnection;
use tokio_util::sync::CancellationToken;
use validator::Validate;

use super::strategy::{ExecutionStrategy, ReturningWrites, TwoPhaseWrites, WriteStrategy};
use super::{cancellable, LockCoordinator};
use crate::error::{LockError, LockResult};
use crate::models::lock::{GetLockOptions, Lock, LockPage, LockSearchParams};
use crate::models::lock_request::{CreateLockRequest, LockRequest};
use crate::repositories::{LockRepo, LockRequestRepo};

/// Coordinator that writes through a [`WriteStrategy`].
///
/// Holds no connection and no state, so one instance can serve any number
/// of concurrent callers.
#[derive(Debug, Clone, Default)]
pub struct PgLockCoordinator<W> {
    writes: W,
}

impl PgLockCoordinator<TwoPhaseWrites> {
    pub fn two_phase() -> Self {
        Self::new(TwoPhaseWrites)
    }
}

impl PgLockCoordinator<ReturningWrites> {
    pub fn returning() -> Self {
        Self::new(ReturningWrites)
    }
}

impl<W: WriteStrategy> PgLockCoordinator<W> {
    pub fn new(writes: W) -> Self {
        Self { writes }
    }

    /// The acquisition algorithm, evaluated at a single instant `now`.
    ///
    /// 1. No ledger row: create it for `requester`.
    /// 2. Row effectively free: promote the oldest live waiter if there is
    ///    one, otherwise assign `requester`.
    /// 3. Row held by someone else: return it untouched.
    #[tracing::instrument(skip(self, conn), fields(strategy = %self.writes.kind()))]
    async fn acquire(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        requester: &str,
        expiry: Option<Timestamp>,
        now: Timestamp,
    ) -> LockResult<Lock> {
        if let Some(created) = self
            .writes
            .insert_if_absent(&mut *conn, resource, requester, expiry, now)
            .await?
        {
            tracing::debug!("Lock row created by first acquisition");
            return Ok(created);
        }

        // The insert conflicted, so the row exists and its inserter has
        // committed. Take the row lock before deciding anything.
        let current = LockRepo::find(&mut *conn, resource, None, true)
            .await?
            .ok_or_else(|| {
                LockError::invariant(format!("lock '{resource}' missing after insert conflict"))
            })?;

        if !current.is_effectively_free_for(requester, now) {
            tracing::debug!(holder = ?current.locked_by, "Lock held by another requester");
            return Ok(current);
        }

        let oldest = LockRequestRepo::find_oldest_live_for_update(&mut *conn, resource, now).await?;
        let assignment = choose_assignment(
            requester,
            expiry,
            oldest.as_ref().map(LockRequest::as_candidate),
            now,
        );

        if assignment.is_from_queue() {
            let removed =
                LockRequestRepo::delete_for_requester(&mut *conn, resource, &assignment.locked_by)
                    .await?;
            tracing::info!(
                winner = %assignment.locked_by,
                removed_requests = removed,
                "Lock assigned to queued request"
            );
        }

        let updated = self.writes.assign(conn, resource, &assignment, now).await?;
        tracing::debug!(holder = ?updated.locked_by, "Lock assigned");
        Ok(updated)
    }
}

#[async_trait]
impl<W: WriteStrategy> LockCoordinator for PgLockCoordinator<W> {
    fn strategy(&self) -> ExecutionStrategy {
        self.writes.kind()
    }

    async fn try_acquire(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        requester: &str,
        expiry: Option<Timestamp>,
        cancel: &CancellationToken,
    ) -> LockResult<Lock> {
        validate_identifier("resource", resource)?;
        validate_identifier("requester", requester)?;
        let now = Utc::now();
        cancellable(cancel, self.acquire(conn, resource, requester, expiry, now)).await
    }

    #[tracing::instrument(
        skip(self, conn, request, cancel),
        fields(resource = %request.resource, requester = %request.requester)
    )]
    async fn enqueue_request(
        &self,
        conn: &mut PgConnection,
        request: &CreateLockRequest,
        cancel: &CancellationToken,
    ) -> LockResult<LockRequest> {
        request.validate()?;
        let now = Utc::now();
        let created = cancellable(cancel, async {
            LockRequestRepo::create(conn, request, now)
                .await
                .map_err(LockError::from)
        })
        .await?;
        tracing::debug!(request_id = created.id, "Lock request enqueued");
        Ok(created)
    }

    async fn get_lock(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        options: GetLockOptions,
        cancel: &CancellationToken,
    ) -> LockResult<Option<Lock>> {
        validate_identifier("resource", resource)?;
        let pending_at = options.count_requests.then(Utc::now);
        cancellable(cancel, async {
            LockRepo::find(conn, resource, pending_at, options.for_update)
                .await
                .map_err(LockError::from)
        })
        .await
    }

    async fn search(
        &self,
        conn: &mut PgConnection,
        params: &LockSearchParams,
        cancel: &CancellationToken,
    ) -> LockResult<LockPage> {
        let page = clamp_page(params.page);
        let page_size = clamp_limit(params.page_size, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE);
        let filter = params.filter.as_deref().filter(|f| !f.is_empty());
        let sort = params.sort.unwrap_or_default();
        let now = Utc::now();

        cancellable(cancel, async {
            let items = LockRepo::search(
                &mut *conn,
                filter,
                sort,
                params.sort_descending,
                page_size,
                page_offset(page, page_size),
                now,
            )
            .await?;
            let total = LockRepo::count(conn, filter).await?;
            Ok::<_, LockError>(LockPage {
                items,
                total,
                page,
                page_size,
            })
        })
        .await
    }

    #[tracing::instrument(skip(self, conn, cancel))]
    async fn release(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        requester: &str,
        cancel: &CancellationToken,
    ) -> LockResult<bool> {
        validate_identifier("resource", resource)?;
        validate_identifier("requester", requester)?;
        let released = cancellable(cancel, async {
            LockRepo::release(conn, resource, requester)
                .await
                .map_err(LockError::from)
        })
        .await?;
        if released {
            tracing::debug!("Lock released");
        } else {
            tracing::debug!("Release ignored, requester is not the holder");
        }
        Ok(released)
    }

    #[tracing::instrument(skip(self, conn, cancel))]
    async fn cancel_request(
        &self,
        conn: &mut PgConnection,
        request_id: DbId,
        cancel: &CancellationToken,
    ) -> LockResult<bool> {
        cancellable(cancel, async {
            LockRequestRepo::delete(conn, request_id)
                .await
                .map_err(LockError::from)
        })
        .await
    }

    async fn list_requests(
        &self,
        conn: &mut PgConnection,
        resource: &str,
        cancel: &CancellationToken,
    ) -> LockResult<Vec<LockRequest>> {
        validate_identifier("resource", resource)?;
        let now = Utc::now();
        cancellable(cancel, async {
            LockRequestRepo::list_live(conn, resource, now)
                .await
                .map_err(LockError::from)
        })
        .await
    }
}

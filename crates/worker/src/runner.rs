//! Acquire, hold and release loop for a single lock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use lockledger_core::lease::lease_deadline;
use lockledger_core::types::DbId;
use lockledger_db::models::lock::{GetLockOptions, Lock};
use lockledger_db::models::lock_request::CreateLockRequest;
use lockledger_db::{coordinator_for, DbPool, LockCoordinator, LockError, LockResult};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The lock was held for the configured time and then released.
    Released(Lock),
    /// The queued request timed out before the lock came free.
    TimedOut,
    /// Shutdown was requested.
    Cancelled,
}

/// The parts of [`WorkerConfig`] the loop needs.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub resource: String,
    pub worker_id: String,
    pub lease_secs: i32,
    pub wait_timeout: Duration,
    pub hold: Duration,
    pub poll_interval: Duration,
}

impl From<&WorkerConfig> for RunSettings {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            resource: config.resource.clone(),
            worker_id: config.worker_id.clone(),
            lease_secs: config.lease_secs,
            wait_timeout: config.wait_timeout,
            hold: config.hold,
            poll_interval: config.poll_interval,
        }
    }
}

pub struct LockWorker {
    pool: DbPool,
    coordinator: Arc<dyn LockCoordinator>,
    settings: RunSettings,
}

impl LockWorker {
    pub fn new(pool: DbPool, coordinator: Arc<dyn LockCoordinator>, settings: RunSettings) -> Self {
        Self {
            pool,
            coordinator,
            settings,
        }
    }

    pub fn from_config(pool: DbPool, config: &WorkerConfig) -> Self {
        Self::new(pool, coordinator_for(config.strategy), RunSettings::from(config))
    }

    /// Run one acquire, hold, release cycle.
    ///
    /// While another holder has the lock the worker queues once and polls.
    /// A queued win is picked up by whichever attempt promotes it, ours or
    /// another requester's.
    pub async fn run(&self, cancel: &CancellationToken) -> anyhow::Result<RunOutcome> {
        let settings = &self.settings;
        let give_up_at = Utc::now() + TimeDelta::from_std(settings.wait_timeout)?;
        let mut queued: Option<DbId> = None;

        let held = loop {
            let lock = match self.attempt(cancel).await {
                Ok(lock) => lock,
                Err(LockError::Cancelled) => return self.abandon(queued, RunOutcome::Cancelled).await,
                Err(e) => return Err(e.into()),
            };

            let now = Utc::now();
            if lock.is_held_by(&settings.worker_id, now) {
                break lock;
            }

            if queued.is_none() {
                match self.enqueue(cancel, give_up_at).await {
                    Ok(id) => queued = Some(id),
                    Err(LockError::Cancelled) => return Ok(RunOutcome::Cancelled),
                    Err(e) => return Err(e.into()),
                }
            }

            if now >= give_up_at {
                tracing::warn!(resource = %settings.resource, "Gave up waiting for lock");
                return self.abandon(queued, RunOutcome::TimedOut).await;
            }

            tracing::debug!(
                resource = %settings.resource,
                holder = ?lock.locked_by,
                "Lock busy, waiting",
            );
            tokio::select! {
                _ = cancel.cancelled() => return self.abandon(queued, RunOutcome::Cancelled).await,
                _ = tokio::time::sleep(settings.poll_interval) => {}
            }
        };

        tracing::info!(
            resource = %settings.resource,
            worker_id = %settings.worker_id,
            expiry_date = ?held.expiry_date,
            "Lock acquired",
        );

        // A direct win leaves our queued row behind.
        if let Some(id) = queued {
            self.withdraw(id).await?;
        }

        if settings.lease_secs > 0 && settings.hold.as_secs() > settings.lease_secs as u64 {
            tracing::warn!(
                hold_secs = settings.hold.as_secs(),
                lease_secs = settings.lease_secs,
                "Hold outlasts the lease, the lock may be taken over before release",
            );
        }

        let cancelled = tokio::select! {
            _ = cancel.cancelled() => true,
            _ = tokio::time::sleep(settings.hold) => false,
        };

        // Release runs on its own token so shutdown still gives the lock back.
        let release_token = CancellationToken::new();
        let mut tx = self.pool.begin().await?;
        let released = self
            .coordinator
            .release(&mut *tx, &settings.resource, &settings.worker_id, &release_token)
            .await?;
        tx.commit().await?;
        tracing::info!(resource = %settings.resource, released, "Lock released");

        if cancelled {
            Ok(RunOutcome::Cancelled)
        } else {
            Ok(RunOutcome::Released(held))
        }
    }

    /// The ledger row with its live queue length.
    pub async fn current_state(&self) -> LockResult<Option<Lock>> {
        let cancel = CancellationToken::new();
        let mut conn = self.pool.acquire().await?;
        self.coordinator
            .get_lock(
                &mut conn,
                &self.settings.resource,
                GetLockOptions {
                    count_requests: true,
                    for_update: false,
                },
                &cancel,
            )
            .await
    }

    /// One transaction: keep a lock we already hold, otherwise try for it.
    ///
    /// Calling `try_acquire` as the holder would hand the lock to the oldest
    /// waiter, so holding is checked first.
    async fn attempt(&self, cancel: &CancellationToken) -> LockResult<Lock> {
        let settings = &self.settings;
        let mut tx = self.pool.begin().await?;

        let current = self
            .coordinator
            .get_lock(&mut *tx, &settings.resource, GetLockOptions::default(), cancel)
            .await?;
        if let Some(lock) = current.filter(|l| l.is_held_by(&settings.worker_id, Utc::now())) {
            tx.commit().await?;
            return Ok(lock);
        }

        let expiry = lease_deadline(Utc::now(), Some(settings.lease_secs).filter(|s| *s > 0));
        let lock = self
            .coordinator
            .try_acquire(&mut *tx, &settings.resource, &settings.worker_id, expiry, cancel)
            .await?;
        tx.commit().await?;
        Ok(lock)
    }

    async fn enqueue(
        &self,
        cancel: &CancellationToken,
        give_up_at: chrono::DateTime<Utc>,
    ) -> LockResult<DbId> {
        let settings = &self.settings;
        let mut request = CreateLockRequest::new(&settings.resource, &settings.worker_id)
            .with_timeout(give_up_at);
        if settings.lease_secs > 0 {
            request = request.with_expiry_time_secs(settings.lease_secs);
        }

        let mut tx = self.pool.begin().await?;
        let created = self
            .coordinator
            .enqueue_request(&mut *tx, &request, cancel)
            .await?;
        tx.commit().await?;
        tracing::info!(request_id = created.id, resource = %settings.resource, "Queued for lock");
        Ok(created.id)
    }

    async fn withdraw(&self, request_id: DbId) -> LockResult<bool> {
        let cancel = CancellationToken::new();
        let mut conn = self.pool.acquire().await?;
        self.coordinator
            .cancel_request(&mut conn, request_id, &cancel)
            .await
    }

    async fn abandon(&self, queued: Option<DbId>, outcome: RunOutcome) -> anyhow::Result<RunOutcome> {
        if let Some(id) = queued {
            let withdrawn = self.withdraw(id).await?;
            tracing::debug!(request_id = id, withdrawn, "Queued request withdrawn");
        }
        Ok(outcome)
    }
}

//! Integration tests for reads, listing, validation, cancellation and
//! concurrent access to the lock ledger.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use chrono::{TimeDelta, Utc};
use lockledger_core::error::CoreError;
use lockledger_core::pagination::LockSortColumn;
use lockledger_db::models::lock::{GetLockOptions, Lock, LockSearchParams};
use lockledger_db::models::lock_request::CreateLockRequest;
use lockledger_db::{coordinator_for, ExecutionStrategy, LockCoordinator, LockError};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

fn coordinator() -> Arc<dyn LockCoordinator> {
    coordinator_for(ExecutionStrategy::Returning)
}

async fn acquire(pool: &PgPool, resource: &str, requester: &str) -> Lock {
    let cancel = CancellationToken::new();
    let mut tx = pool.begin().await.unwrap();
    let lock = coordinator()
        .try_acquire(&mut *tx, resource, requester, None, &cancel)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    lock
}

async fn enqueue(pool: &PgPool, request: CreateLockRequest) {
    let cancel = CancellationToken::new();
    let mut conn = pool.acquire().await.unwrap();
    coordinator()
        .enqueue_request(&mut conn, &request, &cancel)
        .await
        .unwrap();
}

async fn search(pool: &PgPool, params: LockSearchParams) -> lockledger_db::models::lock::LockPage {
    let cancel = CancellationToken::new();
    let mut conn = pool.acquire().await.unwrap();
    coordinator().search(&mut conn, &params, &cancel).await.unwrap()
}

fn resources(locks: &[Lock]) -> Vec<&str> {
    locks.iter().map(|l| l.resource.as_str()).collect()
}

// ---------------------------------------------------------------------------
// get_lock
// ---------------------------------------------------------------------------

/// Reading a never-acquired resource yields nothing.
#[sqlx::test(migrations = "../../db/migrations")]
async fn get_lock_unknown_resource_is_none(pool: PgPool) {
    let cancel = CancellationToken::new();
    let mut conn = pool.acquire().await.unwrap();

    let lock = coordinator()
        .get_lock(&mut conn, "never-seen", GetLockOptions::default(), &cancel)
        .await
        .unwrap();

    assert!(lock.is_none());
}

/// The pending count ignores timed-out and foreign requests.
#[sqlx::test(migrations = "../../db/migrations")]
async fn get_lock_counts_only_live_requests(pool: PgPool) {
    acquire(&pool, "job-42", "worker-1").await;
    enqueue(&pool, CreateLockRequest::new("job-42", "worker-2")).await;
    enqueue(
        &pool,
        CreateLockRequest::new("job-42", "worker-3").with_timeout(Utc::now() - TimeDelta::minutes(1)),
    )
    .await;
    enqueue(&pool, CreateLockRequest::new("other", "worker-4")).await;

    let cancel = CancellationToken::new();
    let mut conn = pool.acquire().await.unwrap();
    let coord = coordinator();

    let plain = coord
        .get_lock(&mut conn, "job-42", GetLockOptions::default(), &cancel)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(plain.pending_requests, None);

    let counted = coord
        .get_lock(
            &mut conn,
            "job-42",
            GetLockOptions {
                count_requests: true,
                for_update: false,
            },
            &cancel,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(counted.locked_by.as_deref(), Some("worker-1"));
    assert_eq!(counted.pending_requests, Some(1));
}

/// Locking the row for update still fills the pending count.
#[sqlx::test(migrations = "../../db/migrations")]
async fn get_lock_for_update_still_counts_requests(pool: PgPool) {
    acquire(&pool, "job-42", "worker-1").await;
    enqueue(&pool, CreateLockRequest::new("job-42", "worker-2")).await;
    enqueue(&pool, CreateLockRequest::new("job-42", "worker-3")).await;

    let cancel = CancellationToken::new();
    let mut tx = pool.begin().await.unwrap();
    let lock = coordinator()
        .get_lock(
            &mut *tx,
            "job-42",
            GetLockOptions {
                count_requests: true,
                for_update: true,
            },
            &cancel,
        )
        .await
        .unwrap()
        .unwrap();
    tx.rollback().await.unwrap();

    assert_eq!(lock.locked_by.as_deref(), Some("worker-1"));
    assert_eq!(lock.pending_requests, Some(2));
}

/// A row-locked read of an idle lock counts zero waiters.
#[sqlx::test(migrations = "../../db/migrations")]
async fn get_lock_for_update_counts_zero_on_empty_queue(pool: PgPool) {
    acquire(&pool, "idle", "worker-1").await;

    let cancel = CancellationToken::new();
    let mut tx = pool.begin().await.unwrap();
    let lock = coordinator()
        .get_lock(
            &mut *tx,
            "idle",
            GetLockOptions {
                count_requests: true,
                for_update: true,
            },
            &cancel,
        )
        .await
        .unwrap()
        .unwrap();
    tx.commit().await.unwrap();

    assert_eq!(lock.pending_requests, Some(0));
}

/// Listing returns only live requests, oldest first.
#[sqlx::test(migrations = "../../db/migrations")]
async fn list_requests_returns_live_queue_in_order(pool: PgPool) {
    acquire(&pool, "job-42", "worker-1").await;
    enqueue(&pool, CreateLockRequest::new("job-42", "worker-2")).await;
    enqueue(
        &pool,
        CreateLockRequest::new("job-42", "worker-3").with_timeout(Utc::now() - TimeDelta::seconds(5)),
    )
    .await;
    enqueue(&pool, CreateLockRequest::new("job-42", "worker-4")).await;

    let cancel = CancellationToken::new();
    let mut conn = pool.acquire().await.unwrap();
    let queue = coordinator()
        .list_requests(&mut conn, "job-42", &cancel)
        .await
        .unwrap();

    let requesters: Vec<&str> = queue.iter().map(|r| r.requester.as_str()).collect();
    assert_eq!(requesters, vec!["worker-2", "worker-4"]);
}

/// Cancelling a request removes it exactly once.
#[sqlx::test(migrations = "../../db/migrations")]
async fn cancel_request_withdraws_waiter(pool: PgPool) {
    acquire(&pool, "job-42", "worker-1").await;
    let cancel = CancellationToken::new();
    let coord = coordinator();
    let mut conn = pool.acquire().await.unwrap();
    let request = coord
        .enqueue_request(&mut conn, &CreateLockRequest::new("job-42", "worker-2"), &cancel)
        .await
        .unwrap();

    assert!(coord.cancel_request(&mut conn, request.id, &cancel).await.unwrap());
    assert!(!coord.cancel_request(&mut conn, request.id, &cancel).await.unwrap());
    assert!(coord
        .list_requests(&mut conn, "job-42", &cancel)
        .await
        .unwrap()
        .is_empty());
}

// ---------------------------------------------------------------------------
// search
// ---------------------------------------------------------------------------

/// Listing pages through ledger rows by resource.
#[sqlx::test(migrations = "../../db/migrations")]
async fn search_pages_by_resource(pool: PgPool) {
    for name in ["job-03", "job-01", "job-05", "job-02", "job-04"] {
        acquire(&pool, name, "worker-1").await;
    }

    let first = search(
        &pool,
        LockSearchParams {
            page: Some(1),
            page_size: Some(2),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resources(&first.items), vec!["job-01", "job-02"]);
    assert_eq!(first.total, 5);
    assert_eq!(first.total_pages(), 3);

    let last = search(
        &pool,
        LockSearchParams {
            page: Some(3),
            page_size: Some(2),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resources(&last.items), vec!["job-05"]);

    let beyond = search(
        &pool,
        LockSearchParams {
            page: Some(9),
            page_size: Some(2),
            ..Default::default()
        },
    )
    .await;
    assert!(beyond.items.is_empty());
    assert_eq!(beyond.total, 5);
}

/// The filter is a case-sensitive substring match.
#[sqlx::test(migrations = "../../db/migrations")]
async fn search_filters_by_substring(pool: PgPool) {
    for name in ["render/a", "render/b", "export/a", "Render/c"] {
        acquire(&pool, name, "worker-1").await;
    }

    let page = search(
        &pool,
        LockSearchParams {
            filter: Some("render".into()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resources(&page.items), vec!["render/a", "render/b"]);
    assert_eq!(page.total, 2);

    let unfiltered = search(
        &pool,
        LockSearchParams {
            filter: Some(String::new()),
            ..Default::default()
        },
    )
    .await;
    assert_eq!(unfiltered.total, 4);
}

/// Listing sorts by the chosen column and reports waiters.
#[sqlx::test(migrations = "../../db/migrations")]
async fn search_sorts_and_reports_queue_length(pool: PgPool) {
    acquire(&pool, "a", "worker-b").await;
    acquire(&pool, "b", "worker-a").await;
    acquire(&pool, "c", "worker-c").await;
    enqueue(&pool, CreateLockRequest::new("b", "worker-x")).await;
    enqueue(&pool, CreateLockRequest::new("b", "worker-y")).await;

    let by_holder = search(
        &pool,
        LockSearchParams {
            sort: Some(LockSortColumn::LockedBy),
            sort_descending: true,
            ..Default::default()
        },
    )
    .await;
    assert_eq!(resources(&by_holder.items), vec!["c", "a", "b"]);

    let pending: Vec<Option<i64>> = by_holder.items.iter().map(|l| l.pending_requests).collect();
    assert_eq!(pending, vec![Some(0), Some(0), Some(2)]);
}

/// Query-shaped params deserialize and are clamped.
#[sqlx::test(migrations = "../../db/migrations")]
async fn search_params_deserialize_from_query_shape(pool: PgPool) {
    acquire(&pool, "job-1", "worker-1").await;
    let params: LockSearchParams = serde_json::from_value(serde_json::json!({
        "filter": "job",
        "page_size": 10_000,
        "sort": "last_lock_date",
    }))
    .unwrap();

    let page = search(&pool, params).await;

    assert_eq!(page.page, 1);
    assert_eq!(page.page_size, 500);
    assert_eq!(page.total, 1);
}

// ---------------------------------------------------------------------------
// Validation and cancellation
// ---------------------------------------------------------------------------

/// Blank names and negative leases fail before any write.
#[sqlx::test(migrations = "../../db/migrations")]
async fn blank_identifiers_are_rejected_before_any_write(pool: PgPool) {
    let cancel = CancellationToken::new();
    let coord = coordinator();
    let mut conn = pool.acquire().await.unwrap();

    let err = coord
        .try_acquire(&mut conn, "", "worker-1", None, &cancel)
        .await
        .unwrap_err();
    assert_matches!(err, LockError::Core(CoreError::Validation(_)));

    let err = coord
        .try_acquire(&mut conn, "job-42", "   ", None, &cancel)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = coord
        .enqueue_request(&mut conn, &CreateLockRequest::new("job-42", ""), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let err = coord
        .enqueue_request(
            &mut conn,
            &CreateLockRequest::new("job-42", "worker-2").with_expiry_time_secs(-1),
            &cancel,
        )
        .await
        .unwrap_err();
    assert!(err.is_validation());

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM locks")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    let queued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM lock_requests")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!((count, queued), (0, 0));
}

/// A cancelled token stops acquisition before the store is hit.
#[sqlx::test(migrations = "../../db/migrations")]
async fn cancelled_token_leaves_store_untouched(pool: PgPool) {
    let cancel = CancellationToken::new();
    cancel.cancel();
    let mut conn = pool.acquire().await.unwrap();

    for coord in [
        coordinator_for(ExecutionStrategy::TwoPhase),
        coordinator_for(ExecutionStrategy::Returning),
    ] {
        let err = coord
            .try_acquire(&mut conn, "job-42", "worker-1", None, &cancel)
            .await
            .unwrap_err();
        assert_matches!(err, LockError::Cancelled);
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM locks")
        .fetch_one(&mut *conn)
        .await
        .unwrap();
    assert_eq!(count, 0);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

/// Concurrent acquirers all see the same single holder.
#[sqlx::test(migrations = "../../db/migrations")]
async fn concurrent_acquirers_agree_on_one_holder(pool: PgPool) {
    let mut handles = Vec::new();
    for i in 0..5 {
        let pool = pool.clone();
        handles.push(tokio::spawn(async move {
            let requester = format!("worker-{i}");
            let lock = acquire(&pool, "contested", &requester).await;
            (requester, lock.locked_by)
        }));
    }

    let mut holders = HashSet::new();
    let mut winners = 0;
    for handle in handles {
        let (requester, holder) = handle.await.unwrap();
        let holder = holder.expect("lock should be held");
        if holder == requester {
            winners += 1;
        }
        holders.insert(holder);
    }

    assert_eq!(holders.len(), 1);
    assert_eq!(winners, 1);
}

/// A row-locked resource blocks its own acquirers only.
#[sqlx::test(migrations = "../../db/migrations")]
async fn open_transaction_serializes_same_resource_only(pool: PgPool) {
    acquire(&pool, "shared", "worker-0").await;
    acquire(&pool, "unrelated", "worker-0").await;
    let coord = coordinator();
    let cancel = CancellationToken::new();

    // tx1 keeps the ledger row locked until it commits.
    let mut tx1 = pool.begin().await.unwrap();
    let locked = coord
        .get_lock(
            &mut *tx1,
            "shared",
            GetLockOptions {
                count_requests: false,
                for_update: true,
            },
            &cancel,
        )
        .await
        .unwrap();
    assert!(locked.is_some());

    let blocked_pool = pool.clone();
    let mut blocked = tokio::spawn(async move { acquire(&blocked_pool, "shared", "worker-2").await });

    let waited = tokio::time::timeout(Duration::from_millis(300), &mut blocked).await;
    assert!(waited.is_err(), "second acquirer should wait for the row lock");

    // A different resource is not serialized behind tx1.
    let other = tokio::time::timeout(
        Duration::from_secs(5),
        acquire(&pool, "unrelated", "worker-3"),
    )
    .await
    .expect("unrelated resource should not block");
    assert_eq!(other.locked_by.as_deref(), Some("worker-0"));

    tx1.commit().await.unwrap();
    let lock = blocked.await.unwrap();
    assert_eq!(lock.locked_by.as_deref(), Some("worker-0"));
}

/// JSON output omits the pending count when not requested.
#[sqlx::test(migrations = "../../db/migrations")]
async fn lock_serializes_without_absent_count(pool: PgPool) {
    let lock = acquire(&pool, "job-42", "worker-1").await;

    let json = serde_json::to_value(&lock).unwrap();

    assert_eq!(json["resource"], "job-42");
    assert_eq!(json["locked_by"], "worker-1");
    assert!(json["expiry_date"].is_null());
    assert!(json.get("pending_requests").is_none());
}

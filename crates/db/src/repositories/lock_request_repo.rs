//! Repository for the `lock_requests` table (the wait queue).

use lockledger_core::types::{DbId, Timestamp};
use sqlx::PgConnection;

use crate::models::lock_request::{CreateLockRequest, LockRequest};

/// Column list for `lock_requests` queries.
const COLUMNS: &str = "id, resource, requester, created_at, timeout, expiry_time_secs";

/// Predicate for requests that have not timed out at `$2`.
const LIVE: &str = "(timeout IS NULL OR timeout > $2)";

/// Provides statements over the wait queue.
pub struct LockRequestRepo;

impl LockRequestRepo {
    /// Append a request to the queue, stamped with `now`.
    pub async fn create(
        conn: &mut PgConnection,
        input: &CreateLockRequest,
        now: Timestamp,
    ) -> Result<LockRequest, sqlx::Error> {
        let query = format!(
            "INSERT INTO lock_requests (resource, requester, created_at, timeout, expiry_time_secs) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, LockRequest>(&query)
            .bind(&input.resource)
            .bind(&input.requester)
            .bind(now)
            .bind(input.timeout)
            .bind(input.expiry_time_secs)
            .fetch_one(conn)
            .await
    }

    /// Find a request by its ID, live or not.
    pub async fn find_by_id(
        conn: &mut PgConnection,
        id: DbId,
    ) -> Result<Option<LockRequest>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM lock_requests WHERE id = $1");
        sqlx::query_as::<_, LockRequest>(&query)
            .bind(id)
            .fetch_optional(conn)
            .await
    }

    /// Lock and return the oldest request still live at `now`.
    ///
    /// Ties on `created_at` go to the lower `id`. Timed-out rows are skipped
    /// even when they are older.
    pub async fn find_oldest_live_for_update(
        conn: &mut PgConnection,
        resource: &str,
        now: Timestamp,
    ) -> Result<Option<LockRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM lock_requests \
             WHERE resource = $1 AND {LIVE} \
             ORDER BY created_at ASC, id ASC \
             LIMIT 1 \
             FOR UPDATE"
        );
        sqlx::query_as::<_, LockRequest>(&query)
            .bind(resource)
            .bind(now)
            .fetch_optional(conn)
            .await
    }

    /// List the live requests for a resource in queue order.
    pub async fn list_live(
        conn: &mut PgConnection,
        resource: &str,
        now: Timestamp,
    ) -> Result<Vec<LockRequest>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM lock_requests \
             WHERE resource = $1 AND {LIVE} \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, LockRequest>(&query)
            .bind(resource)
            .bind(now)
            .fetch_all(conn)
            .await
    }

    /// Delete every request `requester` holds for `resource`.
    ///
    /// Called when one of them wins the lock. All of the requester's rows
    /// go, live or timed out, not just the winning one.
    pub async fn delete_for_requester(
        conn: &mut PgConnection,
        resource: &str,
        requester: &str,
    ) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM lock_requests WHERE resource = $1 AND requester = $2")
                .bind(resource)
                .bind(requester)
                .execute(conn)
                .await?;
        Ok(result.rows_affected())
    }

    /// Delete a single request by ID.
    ///
    /// Returns `true` if the row existed.
    pub async fn delete(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM lock_requests WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

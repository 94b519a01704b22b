//! Repository for the `locks` table (the lock ledger).

use lockledger_core::pagination::LockSortColumn;
use lockledger_core::types::Timestamp;
use sqlx::PgConnection;

use crate::models::lock::Lock;

/// Column list for `locks` queries.
const COLUMNS: &str = "resource, locked_by, expiry_date, locked_at, last_lock_date";

/// Correlated count of live queue rows for the outer `locks` row.
/// Expects the evaluation instant bound as `$2`.
const PENDING_REQUESTS: &str = "\
    (SELECT COUNT(*) FROM lock_requests r \
     WHERE r.resource = locks.resource \
       AND (r.timeout IS NULL OR r.timeout > $2)) AS pending_requests";

/// Provides statements over the lock ledger.
pub struct LockRepo;

impl LockRepo {
    /// Find a ledger row by resource.
    ///
    /// When `pending_at` is set, `pending_requests` is filled with the number
    /// of queue rows still live at that instant. With `for_update` the row
    /// stays write-locked until the surrounding transaction ends.
    pub async fn find(
        conn: &mut PgConnection,
        resource: &str,
        pending_at: Option<Timestamp>,
        for_update: bool,
    ) -> Result<Option<Lock>, sqlx::Error> {
        let mut query = format!("SELECT {COLUMNS}");
        if pending_at.is_some() {
            query.push_str(", ");
            query.push_str(PENDING_REQUESTS);
        }
        query.push_str(" FROM locks WHERE resource = $1");
        if for_update {
            query.push_str(" FOR UPDATE OF locks");
        }

        let mut q = sqlx::query_as::<_, Lock>(&query).bind(resource);
        if let Some(now) = pending_at {
            q = q.bind(now);
        }
        q.fetch_optional(conn).await
    }

    // -----------------------------------------------------------------------
    // First acquisition
    // -----------------------------------------------------------------------

    /// Insert the ledger row for a never-seen resource.
    ///
    /// Returns `false` if the row already exists. A conflicting insert from a
    /// still-open transaction blocks this call until that transaction ends.
    pub async fn insert_if_absent(
        conn: &mut PgConnection,
        resource: &str,
        locked_by: &str,
        expiry_date: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO locks (resource, locked_by, expiry_date, locked_at, last_lock_date) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (resource) DO NOTHING",
        )
        .bind(resource)
        .bind(locked_by)
        .bind(expiry_date)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Same as [`insert_if_absent`](Self::insert_if_absent), returning the
    /// inserted row instead of a flag.
    pub async fn insert_if_absent_returning(
        conn: &mut PgConnection,
        resource: &str,
        locked_by: &str,
        expiry_date: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<Option<Lock>, sqlx::Error> {
        let query = format!(
            "INSERT INTO locks (resource, locked_by, expiry_date, locked_at, last_lock_date) \
             VALUES ($1, $2, $3, $4, $4) \
             ON CONFLICT (resource) DO NOTHING \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Lock>(&query)
            .bind(resource)
            .bind(locked_by)
            .bind(expiry_date)
            .bind(now)
            .fetch_optional(conn)
            .await
    }

    // -----------------------------------------------------------------------
    // Assignment
    // -----------------------------------------------------------------------

    /// Hand an existing ledger row to a new holder.
    ///
    /// Refreshes both `locked_at` and `last_lock_date`. Returns `false` if no
    /// row exists for `resource`.
    pub async fn assign(
        conn: &mut PgConnection,
        resource: &str,
        locked_by: &str,
        expiry_date: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE locks \
             SET locked_by = $2, expiry_date = $3, locked_at = $4, last_lock_date = $4 \
             WHERE resource = $1",
        )
        .bind(resource)
        .bind(locked_by)
        .bind(expiry_date)
        .bind(now)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Same as [`assign`](Self::assign), returning the updated row.
    pub async fn assign_returning(
        conn: &mut PgConnection,
        resource: &str,
        locked_by: &str,
        expiry_date: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<Option<Lock>, sqlx::Error> {
        let query = format!(
            "UPDATE locks \
             SET locked_by = $2, expiry_date = $3, locked_at = $4, last_lock_date = $4 \
             WHERE resource = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Lock>(&query)
            .bind(resource)
            .bind(locked_by)
            .bind(expiry_date)
            .bind(now)
            .fetch_optional(conn)
            .await
    }

    /// Clear the holder if `requester` currently holds the lock.
    ///
    /// Returns `true` if the row changed. Waiters are not promoted here; the
    /// next acquisition attempt does that.
    pub async fn release(
        conn: &mut PgConnection,
        resource: &str,
        requester: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE locks SET locked_by = NULL, expiry_date = NULL \
             WHERE resource = $1 AND locked_by = $2",
        )
        .bind(resource)
        .bind(requester)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Listing
    // -----------------------------------------------------------------------

    /// List ledger rows with an optional substring filter, including the
    /// live queue length of each.
    ///
    /// `resource` is always the last sort key so pages are stable.
    pub async fn search(
        conn: &mut PgConnection,
        filter: Option<&str>,
        sort: LockSortColumn,
        descending: bool,
        limit: i64,
        offset: i64,
        now: Timestamp,
    ) -> Result<Vec<Lock>, sqlx::Error> {
        let direction = if descending { "DESC" } else { "ASC" };
        let tie_break = if sort == LockSortColumn::Resource {
            String::new()
        } else {
            ", resource ASC".to_string()
        };
        let query = format!(
            "SELECT {COLUMNS}, {PENDING_REQUESTS} \
             FROM locks \
             WHERE ($1::TEXT IS NULL OR strpos(resource, $1) > 0) \
             ORDER BY {} {direction}{tie_break} \
             LIMIT $3 OFFSET $4",
            sort.column_name()
        );
        sqlx::query_as::<_, Lock>(&query)
            .bind(filter)
            .bind(now)
            .bind(limit)
            .bind(offset)
            .fetch_all(conn)
            .await
    }

    /// Count ledger rows matching the listing filter.
    pub async fn count(conn: &mut PgConnection, filter: Option<&str>) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)::BIGINT FROM locks \
             WHERE ($1::TEXT IS NULL OR strpos(resource, $1) > 0)",
        )
        .bind(filter)
        .fetch_one(conn)
        .await
    }
}

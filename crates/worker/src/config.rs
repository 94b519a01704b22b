use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use lockledger_db::{ExecutionStrategy, StoreCapabilities};

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub database_url: String,
    pub max_connections: u32,
    pub strategy: ExecutionStrategy,
    /// Name of the lock to take.
    pub resource: String,
    pub worker_id: String,
    /// Lease granted on acquisition, also used when promoted from the queue.
    /// `0` takes the lock without an expiry.
    pub lease_secs: i32,
    /// How long to stay queued before giving up.
    pub wait_timeout: Duration,
    /// How long to keep the lock once held.
    pub hold: Duration,
    pub poll_interval: Duration,
    pub run_migrations: bool,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var              | Default                     |
    /// |----------------------|-----------------------------|
    /// | `DATABASE_URL`       | required                    |
    /// | `DB_MAX_CONNECTIONS` | `10`                        |
    /// | `LOCK_STRATEGY`      | store default (`returning`) |
    /// | `LOCK_RESOURCE`      | required                    |
    /// | `WORKER_ID`          | `worker-<uuid v4>`          |
    /// | `LEASE_SECS`         | `60`                        |
    /// | `WAIT_TIMEOUT_SECS`  | `300`                       |
    /// | `HOLD_SECS`          | `5`                         |
    /// | `POLL_INTERVAL_MS`   | `500`                       |
    /// | `RUN_MIGRATIONS`     | `false`                     |
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) over an arbitrary source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let database_url = required(&lookup, "DATABASE_URL")?;
        let resource = required(&lookup, "LOCK_RESOURCE")?;

        let preferred = lookup("LOCK_STRATEGY")
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.parse::<ExecutionStrategy>())
            .transpose()
            .context("LOCK_STRATEGY is invalid")?;
        let strategy = ExecutionStrategy::for_store(StoreCapabilities::POSTGRES, preferred);

        let worker_id = lookup("WORKER_ID")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("worker-{}", uuid::Uuid::new_v4()));

        let lease_secs: i32 = parse(&lookup, "LEASE_SECS", 60)?;
        anyhow::ensure!(lease_secs >= 0, "LEASE_SECS must not be negative");

        Ok(Self {
            database_url,
            max_connections: parse(&lookup, "DB_MAX_CONNECTIONS", 10)?,
            strategy,
            resource,
            worker_id,
            lease_secs,
            wait_timeout: Duration::from_secs(parse(&lookup, "WAIT_TIMEOUT_SECS", 300)?),
            hold: Duration::from_secs(parse(&lookup, "HOLD_SECS", 5)?),
            poll_interval: Duration::from_millis(parse(&lookup, "POLL_INTERVAL_MS", 500)?),
            run_migrations: parse(&lookup, "RUN_MIGRATIONS", false)?,
        })
    }
}

fn required(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<String> {
    lookup(key)
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("{key} must be set"))
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

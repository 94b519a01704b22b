use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lockledger_worker::config::WorkerConfig;
use lockledger_worker::runner::{LockWorker, RunOutcome};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "lockledger_worker=debug,lockledger_db=debug".into());
    let json = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    // --- Configuration ---
    let config = WorkerConfig::from_env()?;
    tracing::info!(
        resource = %config.resource,
        worker_id = %config.worker_id,
        strategy = %config.strategy,
        "Loaded worker configuration",
    );

    // --- Database ---
    let pool = lockledger_db::create_pool(&config.database_url, config.max_connections)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    lockledger_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    if config.run_migrations {
        lockledger_db::run_migrations(&pool)
            .await
            .context("Failed to run database migrations")?;
        tracing::info!("Database migrations applied");
    }

    // --- Shutdown ---
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    // --- Run ---
    let worker = LockWorker::from_config(pool.clone(), &config);
    match worker.run(&cancel).await? {
        RunOutcome::Released(lock) => {
            tracing::info!(
                locked_at = %lock.locked_at_local(),
                expiry = ?lock.expiry_date_local(),
                "Work finished",
            );
        }
        RunOutcome::TimedOut => tracing::warn!("Lock was not acquired before the wait timeout"),
        RunOutcome::Cancelled => tracing::info!("Run cancelled"),
    }

    let state = worker.current_state().await?;
    println!("{}", serde_json::to_string_pretty(&state)?);

    pool.close().await;
    tracing::info!("Worker stopped");
    Ok(())
}

/// Wait for a termination signal.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), shutting down");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        }
    }
}

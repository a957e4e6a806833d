mod cache;
mod circuit_breaker;
mod config;
mod constants;
mod error;
mod gap;
mod health;
mod lock;
mod metrics;
mod monitor;
mod rate_limiter;
mod reorg;
mod retry;
mod rpc;
mod shutdown;
mod store;
mod sync;
mod telemetry;
mod types;
mod validation;

use std::sync::Arc;
use std::time::Duration;

use bigdecimal::BigDecimal;
use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::{get_global_config, init_global_config};
use crate::error::{IndexerError, LockError};
use crate::lock::DistributedLock;
use crate::rate_limiter::RateLimiter;
use crate::rpc::RpcClient;
use crate::shutdown::ShutdownSequencer;
use crate::store::Store;
use crate::sync::SyncEngine;
use crate::telemetry::{init_tracing, TelemetryConfig};
use crate::types::AppState;

#[derive(Parser, Debug)]
#[command(name = "rustyblox-evm-indexer", about = "EVM-compatible block indexer")]
struct Cli {
    /// Chain ID to index (overrides the `chain_id` config/env value).
    #[arg(long)]
    chain_id: Option<i64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_global_config()?;
    let config = get_global_config();

    init_tracing(TelemetryConfig {
        log_level: config.log_level.clone(),
        ..TelemetryConfig::default()
    })?;
    metrics::init_metrics()?;

    tracing::info!(instance_id = %config.instance_id, "starting indexer");

    let pool = PgPoolOptions::new()
        .max_connections(config.concurrency as u32 + 5)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let chain_id = BigDecimal::from(cli.chain_id.unwrap_or(1));

    let rate_limiter = Arc::new(
        RateLimiter::new(
            config.rate_limit_tokens,
            config.rate_limit_interval_ms,
            config.rate_limit_burst,
        )
        .map_err(IndexerError::from)?,
    );
    let rpc = Arc::new(RpcClient::new(
        config.rpc_urls.clone(),
        config.rpc_timeout(),
        config.max_retries,
        Duration::from_millis(config.retry_delay_ms),
        rate_limiter.clone(),
    ));
    let breaker = Arc::new(CircuitBreaker::new("global", 5, Duration::from_secs(30)));
    let shutdown = Arc::new(ShutdownSequencer::new());

    let state = Arc::new(AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        rate_limiter: rate_limiter.clone(),
        breaker: breaker.clone(),
        shutdown: shutdown.clone(),
    });

    let lock = DistributedLock::new("sync-engine", config.instance_id.clone(), pool.clone());
    DistributedLock::sweep_expired(&pool).await.ok();
    let guard = match lock
        .try_acquire(config.poll_interval_ms.max(1_000) as i64 * 10)
        .await
        .map_err(IndexerError::from)?
    {
        Some(guard) => guard,
        None => {
            let err = IndexerError::from(LockError::HeldElsewhere("sync-engine".to_string()));
            tracing::error!(error = %err, "another instance already holds the sync-engine lock, exiting");
            return Err(err.into());
        }
    };

    if let Ok(Some(lock_row)) = DistributedLock::current(&pool, "sync-engine").await {
        tracing::info!(
            instance_id = %lock_row.instance_id,
            expires_at = %lock_row.expires_at,
            "holding sync-engine lock"
        );
    }

    let health_state = state.clone();
    let health_port = config.health_check_port;
    let health_shutdown = shutdown.clone();
    let health_handle = tokio::spawn(async move {
        tokio::select! {
            result = health::serve(health_state, health_port) => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "health server exited with an error");
                }
            }
            _ = async {
                while !health_shutdown.is_shutting_down() {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
            } => {}
        }
    });

    // Honors SIGINT, SIGTERM, SIGUSR2 per spec.md §6; the sequencer's
    // `trigger()` is idempotent, so whichever signal lands first wins and a
    // duplicate is silently ignored.
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        let mut sigusr2 = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined2())
            .expect("failed to install SIGUSR2 handler");
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if result.is_ok() {
                    tracing::info!(signal = "SIGINT", "beginning graceful shutdown");
                }
            }
            _ = sigterm.recv() => {
                tracing::info!(signal = "SIGTERM", "beginning graceful shutdown");
            }
            _ = sigusr2.recv() => {
                tracing::info!(signal = "SIGUSR2", "beginning graceful shutdown");
            }
        }
        signal_shutdown.trigger();
    });

    let store = Store::new(pool.clone());
    let engine = Arc::new(SyncEngine::new(
        Store::new(pool.clone()),
        rpc.clone(),
        chain_id.clone(),
        config.batch_size,
        config.concurrency,
        config.confirmation_depth,
        config.max_reorg_depth,
        crate::constants::MAX_FUTURE_TIMESTAMP_SECS,
        shutdown.clone(),
    ));

    // Priority 1: stop the health/API server from accepting new requests.
    shutdown
        .register("health-api-server", 1, {
            let health_handle = health_handle.abort_handle();
            move || {
                health_handle.abort();
                Box::pin(async { Ok(()) })
            }
        })
        .await;

    // Priority 5: sync loop. By the time handlers run the scheduler has
    // already observed the shutdown flag and returned, so this just gives
    // any straggling in-flight RPC calls the spec's one-second grace window.
    shutdown
        .register("sync-loop", 5, || Box::pin(async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            Ok(())
        }))
        .await;

    shutdown
        .register("sweep stale lock rows", 8, {
            let pool = pool.clone();
            move || {
                let pool = pool.clone();
                Box::pin(async move {
                    DistributedLock::sweep_expired(&pool)
                        .await
                        .map_err(|e| e.to_string())
                })
            }
        })
        .await;

    // Priority 10: log final coverage statistics, then drain the pool.
    shutdown
        .register("database-pool", 10, {
            let pool = pool.clone();
            let chain_id = chain_id.clone();
            move || {
                let pool = pool.clone();
                let chain_id = chain_id.clone();
                Box::pin(async move {
                    let coverage_store = Store::new(pool.clone());
                    match coverage_store.coverage_stats(&chain_id).await {
                        Ok(stats) => tracing::info!(
                            total = %stats.total,
                            expected = %stats.expected,
                            missing = %stats.missing,
                            coverage_percent = stats.coverage_percent,
                            "final coverage statistics"
                        ),
                        Err(e) => tracing::warn!(error = %e, "failed to compute final coverage statistics"),
                    }
                    pool.close().await;
                    Ok(())
                })
            }
        })
        .await;

    // Routed through `IndexerError` rather than propagated with `?` directly:
    // shutdown must still run its handlers (lock release, pool drain) even
    // when the scheduler exits with an error, so the error is carried to the
    // end of `main` and only converted to `anyhow::Error` on the final line.
    let scheduler_result: Result<(), IndexerError> = monitor::run(
        engine,
        store,
        chain_id,
        shutdown.clone(),
        config.poll_interval(),
        30,
    )
    .await
    .map_err(IndexerError::from);

    if let Err(e) = &scheduler_result {
        tracing::error!(error = %e, "scheduler exited with an error");
    }

    if let Err(e) = guard.release(&pool).await {
        tracing::warn!(error = %e, "failed to release sync-engine lock");
    }

    let report = shutdown.run_handlers().await;
    tracing::info!(successes = report.successes, failures = report.failures, "shutdown handlers complete");

    tracing::info!("shutdown complete");
    scheduler_result.map_err(Into::into)
}

/// The outer scheduler loop: catch up to tip, then alternate between
/// incremental batches and periodic gap repair until shutdown.
///
/// The teacher's `run_block_monitor` is a single `loop { sleep(poll_interval);
/// get tips; detect_reorg; index new blocks }`. That shape survives almost
/// unchanged — what moves into [`crate::sync::SyncEngine`] and
/// [`crate::reorg`] is the per-iteration body, since a relational store with
/// a `sync_status` row and a SQL gap scan replaces the teacher's ad hoc
/// rocksdb tip comparison and in-memory `detect_reorg`.
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::constants::DEFAULT_CHECKPOINT_RETENTION;
use crate::error::SyncError;
use crate::gap::{cleanup_old_gaps, repair_gaps};
use crate::metrics;
use crate::shutdown::ShutdownSequencer;
use crate::store::Store;
use crate::sync::SyncEngine;

/// Runs forever (until `shutdown.is_shutting_down()`): drains the sync
/// engine down to the confirmed tip, then every `gap_repair_interval` polls
/// also attempts to backfill any open gaps and purge old filled ones.
pub async fn run(
    engine: Arc<SyncEngine>,
    store: Store,
    chain_id: bigdecimal::BigDecimal,
    shutdown: Arc<ShutdownSequencer>,
    poll_interval: Duration,
    gap_repair_every: u32,
) -> Result<(), SyncError> {
    let mut iterations_since_gap_repair = 0u32;

    loop {
        if shutdown.is_shutting_down() {
            tracing::info!("scheduler observed shutdown signal, stopping");
            break;
        }

        let started = Instant::now();
        match engine.sync_to_tip(&shutdown).await {
            Ok(total) if total > 0 => {
                tracing::info!(blocks = total, elapsed_ms = started.elapsed().as_millis(), "caught up to confirmed tip");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(error = %e, "sync_to_tip failed, will retry next poll");
            }
        }

        iterations_since_gap_repair += 1;
        if iterations_since_gap_repair >= gap_repair_every {
            iterations_since_gap_repair = 0;
            match repair_gaps(&store, &engine, &chain_id).await {
                Ok(filled) if filled > 0 => tracing::info!(filled, "gap repair pass filled gaps"),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "gap repair pass failed"),
            }
            if let Err(e) = cleanup_old_gaps(&store).await {
                tracing::warn!(error = %e, "gap cleanup failed");
            }
            if let Err(e) = store.cleanup_old_checkpoints(DEFAULT_CHECKPOINT_RETENTION).await {
                tracing::warn!(error = %e, "checkpoint cleanup failed");
            }
            match store.list_open_gaps(&chain_id).await {
                Ok(gaps) => {
                    let pending = gaps.iter().filter(|g| g.status == "pending").count() as i64;
                    let retrying = gaps.iter().filter(|g| g.status == "retrying").count() as i64;
                    metrics::set_gaps_open("pending", pending);
                    metrics::set_gaps_open("retrying", retrying);
                }
                Err(e) => tracing::warn!(error = %e, "failed to list open gaps for metrics"),
            }
            match store.coverage_stats(&chain_id).await {
                Ok(stats) => metrics::set_coverage_percent(stats.coverage_percent),
                Err(e) => tracing::warn!(error = %e, "failed to compute coverage stats"),
            }
        }

        if shutdown.is_shutting_down() {
            break;
        }
        tokio::time::sleep(poll_interval).await;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_interval_is_a_plain_duration() {
        let interval = Duration::from_millis(2_000);
        assert_eq!(interval.as_secs(), 2);
    }
}

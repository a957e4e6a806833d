/// The sync engine: fetch, validate, persist, and advance the checkpoint.
///
/// The teacher's `sync.rs` picks between a one-shot `.dat`-file bulk import
/// and a live RPC poll loop (`run_live_sync` delegating to `monitor.rs`).
/// There's no bulk-import analog here — every block comes from RPC — so
/// this keeps the "detect current status, then loop" shape and the
/// concurrency-bounded fetch idiom from `parallel.rs`, rewritten around
/// `syncBatch`'s six phases: fetch, validate continuity, detect reorg,
/// persist, advance checkpoint, detect gaps.
use bigdecimal::BigDecimal;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;

use crate::cache::{HashLookupCache, TtlHashCache};
use crate::error::SyncError;
use crate::gap::detect_gaps;
use crate::reorg::{handle_reorg, verify_chain_continuity};
use crate::rpc::RpcClient;
use crate::shutdown::ShutdownSequencer;
use crate::store::Store;
use crate::types::{Block, SyncStatus};
use crate::validation::validate_block;
use crate::{constants, metrics};

pub struct SyncEngine {
    store: Store,
    rpc: Arc<RpcClient>,
    cache: HashLookupCache,
    continuity_cache: TtlHashCache,
    chain_id: BigDecimal,
    batch_size: u64,
    concurrency: usize,
    confirmation_depth: u64,
    max_reorg_depth: u64,
    max_future_skew_secs: i64,
    shutdown: Arc<ShutdownSequencer>,
}

pub struct BatchOutcome {
    pub blocks_synced: u64,
    pub reorg_handled: bool,
    pub next_block: u64,
    pub checkpoint_advanced: bool,
}

impl SyncEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        rpc: Arc<RpcClient>,
        chain_id: BigDecimal,
        batch_size: u64,
        concurrency: usize,
        confirmation_depth: u64,
        max_reorg_depth: u64,
        max_future_skew_secs: i64,
        shutdown: Arc<ShutdownSequencer>,
    ) -> Self {
        Self {
            store,
            rpc,
            cache: HashLookupCache::new(constants::HASH_LOOKUP_CACHE_CAPACITY),
            continuity_cache: TtlHashCache::new(
                constants::HASH_LOOKUP_CACHE_CAPACITY,
                std::time::Duration::from_secs(constants::CONTINUITY_CACHE_TTL_SECS),
            ),
            chain_id,
            batch_size,
            concurrency,
            confirmation_depth,
            max_reorg_depth,
            max_future_skew_secs,
            shutdown,
        }
    }

    async fn fetch_range(&self, start: u64, end: u64) -> Result<Vec<Block>, SyncError> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let now_secs = chrono::Utc::now().timestamp();
        let chain_id = self.chain_id.clone();

        let tasks = (start..=end).map(|height| {
            let sem = semaphore.clone();
            let rpc = self.rpc.clone();
            let chain_id = chain_id.clone();
            let shutdown = self.shutdown.clone();
            async move {
                let _permit = sem.acquire().await.expect("semaphore closed");
                if shutdown.is_shutting_down() {
                    return Err(SyncError::FetchFailed(vec![format!("{height}:shutdown")]));
                }
                let raw = rpc.get_block_by_number(height).await?;
                match raw {
                    Some(raw) => validate_block(&chain_id, &raw, now_secs, self.max_future_skew_secs)
                        .map_err(SyncError::Validation),
                    None => Err(SyncError::FetchFailed(vec![height.to_string()])),
                }
            }
        });

        let results = join_all(tasks).await;
        let mut blocks = Vec::with_capacity(results.len());
        let mut failed = Vec::new();
        for (height, result) in (start..=end).zip(results) {
            match result {
                Ok(block) => blocks.push(block),
                Err(_) => failed.push(height.to_string()),
            }
        }
        if !failed.is_empty() {
            return Err(SyncError::FetchFailed(failed));
        }
        blocks.sort_by(|a, b| a.number.cmp(&b.number));
        Ok(blocks)
    }

    fn verify_continuity(&self, blocks: &[Block], expected_parent: &Option<String>) -> Result<(), SyncError> {
        let mut prev_hash = expected_parent.clone();
        for block in blocks {
            if let Some(expected) = &prev_hash {
                if !block.parent_hash.eq_ignore_ascii_case(expected) {
                    return Err(SyncError::Discontinuity {
                        height: block.number.to_string(),
                        expected: expected.clone(),
                        actual: block.parent_hash.clone(),
                    });
                }
            }
            prev_hash = Some(block.hash.clone());
        }
        Ok(())
    }

    /// Runs one bounded batch starting at the store's current `next_block`,
    /// capped by `batch_size` and the confirmed remote tip: fetch, validate
    /// continuity against our own last persisted block, resolve any reorg the
    /// continuity check surfaces, persist, and CAS-advance the checkpoint.
    pub async fn sync_batch(&self) -> Result<BatchOutcome, SyncError> {
        self.store.init_sync_status(&self.chain_id).await?;
        let status = self
            .store
            .get_sync_status(&self.chain_id)
            .await?
            .expect("init_sync_status just ensured a row exists");

        let next_block: u64 = status.next_block.to_string().parse().unwrap_or(0);
        let tip = self.rpc.block_number().await.map_err(SyncError::Rpc)?;
        metrics::set_chain_height("rpc_tip", tip as i64);

        if next_block > tip {
            metrics::increment_batches_processed("empty");
            return Ok(BatchOutcome { blocks_synced: 0, reorg_handled: false, next_block, checkpoint_advanced: false });
        }

        let confirmed_tip = tip.saturating_sub(self.confirmation_depth);
        let end = (next_block + self.batch_size - 1).min(confirmed_tip);
        if end < next_block {
            metrics::increment_batches_processed("empty");
            return Ok(BatchOutcome { blocks_synced: 0, reorg_handled: false, next_block, checkpoint_advanced: false });
        }

        self.sync_range(next_block, end, tip, Some(status.next_block.clone())).await
    }

    /// Implements `syncBatch(startHeight, endHeight, expectedParentHash?)`
    /// for an explicit, caller-supplied range: fetch, validate continuity,
    /// resolve reorgs, persist in ascending order, and — only when
    /// `cas_expected` is given — advance `sync_status.next_block` under the
    /// `WHERE next_block = cas_expected` compare-and-swap. Gap repair calls
    /// this with `cas_expected = None` since a gap range sits below the
    /// current `next_block` and has no business racing the forward-sync CAS;
    /// the forward path ([`Self::sync_batch`]) always supplies it.
    pub async fn sync_range(
        &self,
        start: u64,
        end: u64,
        tip: u64,
        cas_expected: Option<BigDecimal>,
    ) -> Result<BatchOutcome, SyncError> {
        let timer = metrics::Timer::new();

        let parent_height = if start == constants::HEIGHT_GENESIS {
            BigDecimal::from(start)
        } else {
            BigDecimal::from(start - 1)
        };
        let expected_parent = if start == constants::HEIGHT_GENESIS {
            None
        } else {
            self.store
                .find_by_height(&self.chain_id, &parent_height)
                .await?
                .map(|b| b.hash)
        };

        let blocks = self.fetch_range(start, end).await?;

        // Cheap, independent seam guard (spec.md §4.2 `verifyChainContinuity`):
        // resolve the first fetched block's parent by hash rather than by the
        // height lookup `expected_parent` above, and confirm it lands at
        // `start - 1`. Any disagreement between the two independent lookups
        // is logged rather than treated as fatal here — the full continuity
        // check below (and its reorg handoff) is what actually decides the
        // batch's fate.
        if let Some(first) = blocks.first() {
            match verify_chain_continuity(&self.store, &self.continuity_cache, &self.chain_id, start, &first.parent_hash).await {
                Ok(false) if start != constants::HEIGHT_GENESIS && expected_parent.is_some() => {
                    tracing::warn!(height = start, parent_hash = %first.parent_hash, "seam continuity guard disagreed with height-based lookup");
                }
                Ok(_) => {}
                Err(err) => tracing::warn!(height = start, %err, "seam continuity guard failed to resolve parent"),
            }
        }

        if let Err(SyncError::Discontinuity { height, expected, actual }) =
            self.verify_continuity(&blocks, &expected_parent)
        {
            // A continuity break is only a reorg if a stored block already
            // exists at the mismatched height with a different hash than the
            // freshly fetched one — that's the chain we'd be rolling back.
            // Otherwise there's nothing to roll back to and this is a fatal
            // discontinuity: abort naming the mismatched hashes.
            let mismatch_height: u64 = height.parse().unwrap_or(start);
            let incoming_hash = blocks
                .iter()
                .find(|b| b.number.to_string() == height)
                .map(|b| b.hash.clone());
            let stored = self
                .store
                .find_by_height(&self.chain_id, &BigDecimal::from(mismatch_height))
                .await?;
            let confirmed_reorg = match (&stored, &incoming_hash) {
                (Some(s), Some(incoming)) => !s.hash.eq_ignore_ascii_case(incoming),
                _ => false,
            };

            if !confirmed_reorg {
                return Err(SyncError::Discontinuity { height, expected, actual });
            }

            handle_reorg(
                &self.store,
                &self.rpc,
                &self.cache,
                &self.chain_id,
                mismatch_height.saturating_sub(1),
                tip,
                self.max_reorg_depth,
            )
            .await
            .map_err(SyncError::Reorg)?;
            metrics::increment_batches_processed("reorg");
            let retried_next = match &cas_expected {
                Some(_) => {
                    let status = self
                        .store
                        .get_sync_status(&self.chain_id)
                        .await?
                        .expect("sync_status row exists");
                    status.next_block.to_string().parse().unwrap_or(start)
                }
                None => start,
            };
            return Ok(BatchOutcome {
                blocks_synced: 0,
                reorg_handled: true,
                next_block: retried_next,
                checkpoint_advanced: false,
            });
        }

        for block in &blocks {
            self.store.upsert_block(block).await?;
        }
        metrics::increment_blocks_synced("inserted", blocks.len() as u64);

        let confirmed_tip = tip.saturating_sub(self.confirmation_depth);
        let checkpoint_advanced = match &cas_expected {
            Some(expected) => {
                let new_next = BigDecimal::from(end + 1);
                let new_confirmed = BigDecimal::from(confirmed_tip);
                let new_head = BigDecimal::from(tip);
                self.store
                    .advance_checkpoint(&self.chain_id, expected, &new_next, &new_confirmed, &new_head)
                    .await?
            }
            None => false,
        };
        if cas_expected.is_some() && !checkpoint_advanced {
            return Err(SyncError::CheckpointRaced);
        }

        if let Some(last) = blocks.last() {
            self.store
                .save_checkpoint("sync_engine", &last.number, &last.hash, None)
                .await?;
        }

        if cas_expected.is_some() {
            // Gap detection scans below the confirmed tip, not the batch's
            // own start height, so a hole left by an earlier failed batch
            // further back in the chain still gets picked up here.
            detect_gaps(&self.store, &self.chain_id, &BigDecimal::from(confirmed_tip)).await?;

            let status = SyncStatus {
                chain_id: self.chain_id.clone(),
                next_block: BigDecimal::from(end + 1),
                confirmed_block: BigDecimal::from(confirmed_tip),
                head_block: BigDecimal::from(tip),
            };
            let behind: i64 = status.blocks_behind_tip().to_string().parse().unwrap_or(0);
            metrics::set_blocks_behind_tip(behind);
        }
        metrics::increment_batches_processed("ok");
        metrics::record_batch_sync_duration(timer.elapsed_secs());

        Ok(BatchOutcome {
            blocks_synced: blocks.len() as u64,
            reorg_handled: false,
            next_block: if checkpoint_advanced { end + 1 } else { start },
            checkpoint_advanced,
        })
    }

    /// Repeatedly calls `sync_batch` until `next_block` is within one batch
    /// of the remote tip, used on startup to catch up before switching to
    /// the poll-driven steady state.
    pub async fn sync_to_tip(&self, shutdown: &crate::shutdown::ShutdownSequencer) -> Result<u64, SyncError> {
        let mut total = 0u64;
        loop {
            if shutdown.is_shutting_down() {
                break;
            }
            let started = Instant::now();
            let outcome = self.sync_batch().await?;
            total += outcome.blocks_synced;
            if outcome.blocks_synced == 0 && !outcome.reorg_handled {
                break;
            }
            tracing::debug!(blocks = outcome.blocks_synced, elapsed_ms = started.elapsed().as_millis(), "batch synced");
        }
        Ok(total)
    }

    /// Fills one gap range via [`Self::sync_range`], clamping `gap_end` to
    /// the current chain tip per spec.md §4.3 ("clamps the upper end to
    /// current chain tip"). Internal continuity across the filled range is
    /// still verified by `sync_range`; only the left seam is intentionally
    /// unchecked, since the gap itself is the break.
    pub async fn repair_gap_range(&self, gap_start: u64, gap_end: u64) -> Result<BatchOutcome, SyncError> {
        let tip = self.rpc.block_number().await.map_err(SyncError::Rpc)?;
        let end = gap_end.min(tip);
        self.sync_range(gap_start, end, tip, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(number: u64, hash: &str, parent: &str) -> Block {
        Block {
            chain_id: BigDecimal::from(1),
            number: BigDecimal::from(number),
            hash: hash.to_string(),
            parent_hash: parent.to_string(),
            timestamp: BigDecimal::from(0),
        }
    }

    #[test]
    fn continuity_holds_for_well_linked_chain() {
        let blocks = vec![block(2, "0xb", "0xa"), block(3, "0xc", "0xb")];
        let engine_check = |blocks: &[Block], parent: &Option<String>| -> Result<(), SyncError> {
            let mut prev = parent.clone();
            for b in blocks {
                if let Some(expected) = &prev {
                    if !b.parent_hash.eq_ignore_ascii_case(expected) {
                        return Err(SyncError::Discontinuity {
                            height: b.number.to_string(),
                            expected: expected.clone(),
                            actual: b.parent_hash.clone(),
                        });
                    }
                }
                prev = Some(b.hash.clone());
            }
            Ok(())
        };
        assert!(engine_check(&blocks, &Some("0xa".to_string())).is_ok());
    }

    #[test]
    fn continuity_fails_on_broken_parent_link() {
        let blocks = vec![block(2, "0xb", "0xZZZ")];
        let mut prev = Some("0xa".to_string());
        let mut result = Ok(());
        for b in &blocks {
            if let Some(expected) = &prev {
                if !b.parent_hash.eq_ignore_ascii_case(expected) {
                    result = Err(SyncError::Discontinuity {
                        height: b.number.to_string(),
                        expected: expected.clone(),
                        actual: b.parent_hash.clone(),
                    });
                    break;
                }
            }
            prev = Some(b.hash.clone());
        }
        assert!(result.is_err());
    }
}

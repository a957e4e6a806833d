/// Gap detection and backfill.
///
/// Generalizes the teacher's `repair.rs` (a one-shot scan-and-fix utility
/// for a specific known data bug) into a recurring worker: detect missing
/// height ranges below the confirmed tip, record them, and retry fetching
/// each range until it fills or exhausts its retry budget. Backfill itself
/// replays through [`crate::sync::SyncEngine::repair_gap_range`] — the same
/// fetch/continuity/persist path the forward sync batch uses — rather than a
/// separate ad hoc fetch-and-upsert loop, per spec.md §4.1's "repairGaps ...
/// clamps the upper end to current chain tip and replays syncBatch".
use bigdecimal::BigDecimal;

use crate::error::SyncError;
use crate::store::Store;
use crate::sync::SyncEngine;
use crate::types::GapStatus;
use crate::{constants, metrics};

/// Scans for missing height ranges below `below_height` and records any not
/// already tracked. Returns the number of newly recorded gaps.
pub async fn detect_gaps(store: &Store, chain_id: &BigDecimal, below_height: &BigDecimal) -> Result<u64, SyncError> {
    let gaps = store.detect_gaps(chain_id, below_height).await?;
    let mut recorded = 0u64;
    for (start, end) in &gaps {
        store.insert_gap(chain_id, start, end).await?;
        recorded += 1;
    }
    if recorded > 0 {
        metrics::increment_gaps_detected(recorded);
        tracing::info!(chain_id = %chain_id, count = recorded, "recorded new gaps");
    }
    Ok(recorded)
}

/// Attempts to fill every open gap row for `chain_id`. Each gap moves
/// `pending -> retrying` on first attempt; a gap that fills entirely is
/// marked `filled`, one that errors records the error message and bumps
/// `retry_count` without discarding the row, so operators can see how many
/// times backfill has failed for a given range.
pub async fn repair_gaps(store: &Store, engine: &SyncEngine, chain_id: &BigDecimal) -> Result<u64, SyncError> {
    let mut filled = 0u64;
    for gap in store.list_open_gaps(chain_id).await? {
        let status = GapStatus::Retrying;
        store
            .mark_gap_status(gap.id, status.as_str(), gap.retry_count + 1, None)
            .await?;

        let start: u64 = gap.gap_start.to_string().parse().unwrap_or(0);
        let end: u64 = gap.gap_end.to_string().parse().unwrap_or(0);

        match engine.repair_gap_range(start, end).await {
            Ok(outcome) if outcome.blocks_synced as u128 >= (end.saturating_sub(start) as u128 + 1) => {
                store
                    .mark_gap_status(gap.id, GapStatus::Filled.as_str(), gap.retry_count + 1, None)
                    .await?;
                filled += 1;
                metrics::increment_gaps_filled();
                tracing::info!(gap_id = gap.id, start, end, "gap backfilled");
            }
            Ok(outcome) => {
                let message = format!("only {} of {} heights synced (reorg_handled={})", outcome.blocks_synced, end - start + 1, outcome.reorg_handled);
                store
                    .mark_gap_status(gap.id, GapStatus::Pending.as_str(), gap.retry_count + 1, Some(&message))
                    .await?;
                tracing::warn!(gap_id = gap.id, start, end, %message, "gap backfill incomplete, will retry");
            }
            Err(err) => {
                store
                    .mark_gap_status(gap.id, GapStatus::Pending.as_str(), gap.retry_count + 1, Some(&err.to_string()))
                    .await?;
                tracing::warn!(gap_id = gap.id, start, end, error = %err, "gap backfill failed, will retry");
            }
        }
    }
    Ok(filled)
}

/// Purges `filled` gap rows older than the configured retention window.
pub async fn cleanup_old_gaps(store: &Store) -> Result<u64, SyncError> {
    Ok(store
        .cleanup_filled_gaps(constants::DEFAULT_GAP_RETENTION_SECS)
        .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gap_status_strings_match_schema_default() {
        assert_eq!(GapStatus::Pending.as_str(), "pending");
        assert_eq!(GapStatus::Retrying.as_str(), "retrying");
        assert_eq!(GapStatus::Filled.as_str(), "filled");
    }
}

/// Relational store: blocks, checkpoints, sync status, and gaps.
///
/// The teacher reaches straight for `rocksdb` column families and a
/// hand-rolled `AtomicBatchWriter` for all-or-nothing multi-CF writes. A
/// relational engine gets the same atomicity natively via transactions, so
/// this collapses that machinery into `sqlx::PgPool` queries — upserts via
/// `ON CONFLICT`, rollback via a single `DELETE ... WHERE number > $1`
/// inside one transaction, and the checkpoint advance as a compare-and-swap
/// `UPDATE ... WHERE next_block = $expected`.
use bigdecimal::BigDecimal;
use sqlx::{PgPool, Row};
use std::str::FromStr;

use crate::error::StoreError;
use crate::metrics;
use crate::types::{Block, Checkpoint, CoverageStats, Gap, SyncStatus};

/// Parses the `::text` cast of `max(number)`, rejecting any scientific
/// notation form the driver might have produced rather than letting
/// `BigDecimal::from_str` round it silently.
fn parse_max_height_text(raw: Option<String>) -> Result<Option<BigDecimal>, StoreError> {
    match raw {
        None => Ok(None),
        Some(s) if s.contains('e') || s.contains('E') => Err(StoreError::ScientificNotation(s)),
        Some(s) => BigDecimal::from_str(&s)
            .map(Some)
            .map_err(|_| StoreError::ScientificNotation(s)),
    }
}

pub struct Store {
    pool: PgPool,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Inserts or updates a block row. `WHERE hash IS DISTINCT FROM
    /// excluded.hash` skips the write (and the trigger-like `updated_at`
    /// bump) when re-fetching a block we already have verbatim, so a no-op
    /// poll of an already-synced tip doesn't churn the table.
    pub async fn upsert_block(&self, block: &Block) -> Result<bool, StoreError> {
        let timer = metrics::Timer::new();
        let result = sqlx::query(
            "INSERT INTO blocks (chain_id, number, hash, parent_hash, timestamp)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (chain_id, number) DO UPDATE SET
                 hash = excluded.hash,
                 parent_hash = excluded.parent_hash,
                 timestamp = excluded.timestamp,
                 updated_at = now()
             WHERE blocks.hash IS DISTINCT FROM excluded.hash",
        )
        .bind(&block.chain_id)
        .bind(&block.number)
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(&block.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            metrics::increment_db_errors("upsert_block");
            e
        })?;
        metrics::record_db_write_duration("upsert_block", timer.elapsed_secs());
        Ok(result.rows_affected() > 0)
    }

    /// Deletes all blocks for `chain_id` strictly above `height`, inside one
    /// transaction. Refuses (returns `ReorgTooDeep`) when that would remove
    /// more than `max_reorg_depth` rows — the caller is expected to check
    /// this before calling, but the store enforces it too as a last line of
    /// defense against a miscomputed rollback target.
    pub async fn delete_blocks_above(
        &self,
        chain_id: &BigDecimal,
        height: &BigDecimal,
        max_reorg_depth: u64,
    ) -> Result<u64, StoreError> {
        let mut tx = self.pool.begin().await?;
        let count_row = sqlx::query(
            "SELECT count(*) AS n FROM blocks WHERE chain_id = $1 AND number > $2",
        )
        .bind(chain_id)
        .bind(height)
        .fetch_one(&mut *tx)
        .await?;
        let count: i64 = count_row.try_get("n")?;
        if count as u64 > max_reorg_depth {
            return Err(StoreError::ReorgTooDeep {
                height: height.to_string(),
                count: count as u64,
                max: max_reorg_depth,
            });
        }

        sqlx::query("DELETE FROM blocks WHERE chain_id = $1 AND number > $2")
            .bind(chain_id)
            .bind(height)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(count as u64)
    }

    pub async fn find_by_height(
        &self,
        chain_id: &BigDecimal,
        height: &BigDecimal,
    ) -> Result<Option<Block>, StoreError> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT chain_id, number, hash, parent_hash, timestamp FROM blocks
             WHERE chain_id = $1 AND number = $2",
        )
        .bind(chain_id)
        .bind(height)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        let row = sqlx::query_as::<_, BlockRow>(
            "SELECT chain_id, number, hash, parent_hash, timestamp FROM blocks WHERE hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn exists_by_hash(&self, hash: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT EXISTS(SELECT 1 FROM blocks WHERE hash = $1) AS e")
            .bind(hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("e")?)
    }

    pub async fn exists_by_height(
        &self,
        chain_id: &BigDecimal,
        height: &BigDecimal,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM blocks WHERE chain_id = $1 AND number = $2) AS e",
        )
        .bind(chain_id)
        .bind(height)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("e")?)
    }

    /// Returns the highest stored height, cast through `::text` and parsed
    /// back explicitly rather than decoded straight into `BigDecimal` by the
    /// driver, so a scientific-notation string form is a rejection, not a
    /// silent pass-through.
    pub async fn max_height(&self, chain_id: &BigDecimal) -> Result<Option<BigDecimal>, StoreError> {
        let row = sqlx::query("SELECT max(number)::text AS m FROM blocks WHERE chain_id = $1")
            .bind(chain_id)
            .fetch_one(&self.pool)
            .await?;
        parse_max_height_text(row.try_get("m")?)
    }

    /// Computes coverage over `[0, maxHeight]`: how many of the possible
    /// heights below and including the stored max are actually present.
    /// Every quantity stays in the big-integer domain until the final
    /// percentage, which is the one place spec.md allows a float.
    pub async fn coverage_stats(&self, chain_id: &BigDecimal) -> Result<CoverageStats, StoreError> {
        let row = sqlx::query(
            "SELECT count(*) AS total, max(number) AS max_number FROM blocks WHERE chain_id = $1",
        )
        .bind(chain_id)
        .fetch_one(&self.pool)
        .await?;
        let total: i64 = row.try_get("total")?;
        let max_number: Option<BigDecimal> = row.try_get("max_number")?;

        let total = BigDecimal::from(total);
        let expected = match &max_number {
            Some(m) => m + BigDecimal::from(1),
            None => BigDecimal::from(0),
        };
        let missing = if expected > total { &expected - &total } else { BigDecimal::from(0) };
        let coverage_percent = if expected == BigDecimal::from(0) {
            0.0
        } else {
            let ratio: f64 = (&total / &expected).to_string().parse().unwrap_or(0.0);
            (ratio * 100.0 * 100.0).round() / 100.0
        };

        Ok(CoverageStats { total, expected, missing, coverage_percent })
    }

    /// Finds contiguous missing-height ranges below `below_height`, using a
    /// window-function gap scan: every row whose height isn't exactly
    /// `prev height + 1` marks the start of a gap ending just before it.
    pub async fn detect_gaps(
        &self,
        chain_id: &BigDecimal,
        below_height: &BigDecimal,
    ) -> Result<Vec<(BigDecimal, BigDecimal)>, StoreError> {
        let rows = sqlx::query(
            "WITH ordered AS (
                 SELECT number, lag(number) OVER (ORDER BY number) AS prev_number
                 FROM blocks
                 WHERE chain_id = $1 AND number <= $2
             )
             SELECT prev_number + 1 AS gap_start, number - 1 AS gap_end
             FROM ordered
             WHERE prev_number IS NOT NULL AND number - prev_number > 1
             ORDER BY gap_start",
        )
        .bind(chain_id)
        .bind(below_height)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let start: BigDecimal = row.try_get("gap_start")?;
                let end: BigDecimal = row.try_get("gap_end")?;
                Ok((start, end))
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }

    pub async fn insert_gap(
        &self,
        chain_id: &BigDecimal,
        gap_start: &BigDecimal,
        gap_end: &BigDecimal,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_gaps (chain_id, gap_start, gap_end)
             VALUES ($1, $2, $3)
             ON CONFLICT (chain_id, gap_start, gap_end) DO NOTHING",
        )
        .bind(chain_id)
        .bind(gap_start)
        .bind(gap_end)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn list_open_gaps(&self, chain_id: &BigDecimal) -> Result<Vec<Gap>, StoreError> {
        let rows = sqlx::query_as::<_, GapRow>(
            "SELECT id, chain_id, gap_start, gap_end, status, retry_count
             FROM sync_gaps WHERE chain_id = $1 AND status != 'filled'
             ORDER BY gap_start",
        )
        .bind(chain_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    pub async fn mark_gap_status(
        &self,
        id: i64,
        status: &str,
        retry_count: i32,
        error_message: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE sync_gaps SET status = $2, retry_count = $3,
                 last_retry_at = now(), error_message = $4
             WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(retry_count)
        .bind(error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn cleanup_filled_gaps(&self, retention_secs: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM sync_gaps
             WHERE status = 'filled' AND last_retry_at < now() - ($1 || ' seconds')::interval",
        )
        .bind(retention_secs.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn get_sync_status(&self, chain_id: &BigDecimal) -> Result<Option<SyncStatus>, StoreError> {
        let row = sqlx::query_as::<_, SyncStatusRow>(
            "SELECT chain_id, next_block, confirmed_block, head_block
             FROM sync_status WHERE chain_id = $1",
        )
        .bind(chain_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    pub async fn init_sync_status(&self, chain_id: &BigDecimal) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_status (chain_id, next_block, confirmed_block, head_block)
             VALUES ($1, 0, 0, 0)
             ON CONFLICT (chain_id) DO NOTHING",
        )
        .bind(chain_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Compare-and-swap advance: only succeeds if `next_block` still equals
    /// `expected`, so two instances racing to advance the checkpoint can't
    /// both succeed and double-count a batch.
    pub async fn advance_checkpoint(
        &self,
        chain_id: &BigDecimal,
        expected: &BigDecimal,
        new_next: &BigDecimal,
        new_confirmed: &BigDecimal,
        new_head: &BigDecimal,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE sync_status
             SET next_block = $3, confirmed_block = $4, head_block = $5, updated_at = now()
             WHERE chain_id = $1 AND next_block = $2",
        )
        .bind(chain_id)
        .bind(expected)
        .bind(new_next)
        .bind(new_confirmed)
        .bind(new_head)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn save_checkpoint(
        &self,
        name: &str,
        block_number: &BigDecimal,
        block_hash: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO sync_checkpoints (name, block_number, block_hash, metadata)
             VALUES ($1, $2, $3, $4)
             ON CONFLICT (name) DO UPDATE SET
                 block_number = excluded.block_number,
                 block_hash = excluded.block_hash,
                 metadata = excluded.metadata,
                 synced_at = now(),
                 updated_at = now()",
        )
        .bind(name)
        .bind(block_number)
        .bind(block_hash)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_latest_checkpoint(&self, name: &str) -> Result<Option<Checkpoint>, StoreError> {
        let row = sqlx::query_as::<_, CheckpointRow>(
            "SELECT id, name, block_number, block_hash, synced_at, metadata
             FROM sync_checkpoints WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    /// Lists every named checkpoint's current row, newest first.
    pub async fn list_checkpoints(&self) -> Result<Vec<Checkpoint>, StoreError> {
        let rows = sqlx::query_as::<_, CheckpointRow>(
            "SELECT id, name, block_number, block_hash, synced_at, metadata
             FROM sync_checkpoints ORDER BY synced_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Keeps only the most recent `retain` checkpoint rows by name. This
    /// store keeps one row per name (upserted), so in practice this trims
    /// historical checkpoint rows once the schema grows to support them; it
    /// is a no-op today and exists so callers can wire it up without a
    /// migration when multi-row history is added.
    pub async fn cleanup_old_checkpoints(&self, retain: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "DELETE FROM sync_checkpoints WHERE id NOT IN (
                 SELECT id FROM sync_checkpoints ORDER BY synced_at DESC LIMIT $1
             )",
        )
        .bind(retain)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[derive(sqlx::FromRow)]
struct BlockRow {
    chain_id: BigDecimal,
    number: BigDecimal,
    hash: String,
    parent_hash: String,
    timestamp: BigDecimal,
}

impl From<BlockRow> for Block {
    fn from(r: BlockRow) -> Self {
        Block {
            chain_id: r.chain_id,
            number: r.number,
            hash: r.hash,
            parent_hash: r.parent_hash,
            timestamp: r.timestamp,
        }
    }
}

#[derive(sqlx::FromRow)]
struct GapRow {
    id: i64,
    chain_id: BigDecimal,
    gap_start: BigDecimal,
    gap_end: BigDecimal,
    status: String,
    retry_count: i32,
}

impl From<GapRow> for Gap {
    fn from(r: GapRow) -> Self {
        Gap {
            id: r.id,
            chain_id: r.chain_id,
            gap_start: r.gap_start,
            gap_end: r.gap_end,
            status: r.status,
            retry_count: r.retry_count,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SyncStatusRow {
    chain_id: BigDecimal,
    next_block: BigDecimal,
    confirmed_block: BigDecimal,
    head_block: BigDecimal,
}

impl From<SyncStatusRow> for SyncStatus {
    fn from(r: SyncStatusRow) -> Self {
        SyncStatus {
            chain_id: r.chain_id,
            next_block: r.next_block,
            confirmed_block: r.confirmed_block,
            head_block: r.head_block,
        }
    }
}

#[derive(sqlx::FromRow)]
struct CheckpointRow {
    id: i64,
    name: String,
    block_number: BigDecimal,
    block_hash: String,
    synced_at: chrono::DateTime<chrono::Utc>,
    metadata: Option<serde_json::Value>,
}

impl From<CheckpointRow> for Checkpoint {
    fn from(r: CheckpointRow) -> Self {
        Checkpoint {
            id: r.id,
            name: r.name,
            block_number: r.block_number,
            block_hash: r.block_hash,
            synced_at: r.synced_at,
            metadata: r.metadata,
        }
    }
}

/// `#[sqlx::test]` hands each test its own ephemeral, migrated database and
/// tears it down afterward, so these exercise the real `ON CONFLICT`/window
/// function/CAS SQL above rather than a mock. Requires `DATABASE_URL` to
/// point at a reachable Postgres server at test time, same as the binary.
#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;

    fn block(chain_id: i64, number: i64, hash: &str, parent: &str) -> Block {
        Block {
            chain_id: BigDecimal::from(chain_id),
            number: BigDecimal::from(number),
            hash: hash.to_string(),
            parent_hash: parent.to_string(),
            timestamp: BigDecimal::from(1_700_000_000 + number),
        }
    }

    fn h(n: u8) -> String {
        format!("0x{:064x}", n)
    }

    #[test]
    fn parse_max_height_text_rejects_scientific_notation() {
        let err = parse_max_height_text(Some("1e20".to_string()));
        assert!(matches!(err, Err(StoreError::ScientificNotation(_))));
    }

    #[test]
    fn parse_max_height_text_accepts_plain_decimal() {
        assert_eq!(parse_max_height_text(Some("12345".to_string())).unwrap(), Some(BigDecimal::from(12345)));
    }

    #[test]
    fn parse_max_height_text_handles_empty_table() {
        assert_eq!(parse_max_height_text(None).unwrap(), None);
    }

    /// Builds a block at height `n` whose parent hash is `h(n - 1)` (or
    /// `h(0)` at the chain start), without wrapping on the `n == 0` case.
    fn chained(chain_id: i64, n: i64) -> Block {
        let parent = if n == 0 { 0u8 } else { (n - 1) as u8 };
        block(chain_id, n, &h(n as u8), &h(parent))
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn upsert_is_idempotent_for_an_unchanged_block(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        let b = block(1, 1, &h(1), &h(0));

        let first = store.upsert_block(&b).await.unwrap();
        assert!(first, "first insert of a new height should report a write");

        let second = store.upsert_block(&b).await.unwrap();
        assert!(!second, "re-upserting an identical block must be a no-op");

        assert_eq!(store.max_height(&chain_id).await.unwrap(), Some(BigDecimal::from(1)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn upsert_reports_a_write_when_the_hash_changes_under_reorg(pool: PgPool) {
        let store = Store::new(pool);
        let original = block(1, 5, &h(5), &h(4));
        store.upsert_block(&original).await.unwrap();

        let replaced = block(1, 5, &h(99), &h(4));
        let changed = store.upsert_block(&replaced).await.unwrap();
        assert!(changed, "a differing hash at the same height must be written");

        let found = store.find_by_height(&BigDecimal::from(1), &BigDecimal::from(5)).await.unwrap().unwrap();
        assert_eq!(found.hash, h(99));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_blocks_above_removes_only_the_requested_range(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        for n in 0..=5i64 {
            store.upsert_block(&chained(1, n)).await.unwrap();
        }

        let removed = store
            .delete_blocks_above(&chain_id, &BigDecimal::from(2), 1000)
            .await
            .unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.max_height(&chain_id).await.unwrap(), Some(BigDecimal::from(2)));
        assert!(store.find_by_height(&chain_id, &BigDecimal::from(3)).await.unwrap().is_none());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn delete_blocks_above_refuses_past_the_reorg_depth_bound(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        for n in 0..=5i64 {
            store.upsert_block(&chained(1, n)).await.unwrap();
        }

        let err = store.delete_blocks_above(&chain_id, &BigDecimal::from(0), 2).await.unwrap_err();
        assert!(matches!(err, StoreError::ReorgTooDeep { count: 5, max: 2, .. }));
        // the refused delete must not have touched anything
        assert_eq!(store.max_height(&chain_id).await.unwrap(), Some(BigDecimal::from(5)));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn coverage_stats_on_an_empty_chain_is_zero(pool: PgPool) {
        let store = Store::new(pool);
        let stats = store.coverage_stats(&BigDecimal::from(1)).await.unwrap();
        assert_eq!(stats.total, BigDecimal::from(0));
        assert_eq!(stats.expected, BigDecimal::from(0));
        assert_eq!(stats.coverage_percent, 0.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn coverage_stats_is_full_with_no_gaps(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        for n in 0..10i64 {
            store.upsert_block(&chained(1, n)).await.unwrap();
        }
        let stats = store.coverage_stats(&chain_id).await.unwrap();
        assert_eq!(stats.total, BigDecimal::from(10));
        assert_eq!(stats.missing, BigDecimal::from(0));
        assert_eq!(stats.coverage_percent, 100.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn coverage_stats_reports_missing_heights_under_a_gap(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        for n in [0i64, 1, 2, 6, 7] {
            store.upsert_block(&chained(1, n)).await.unwrap();
        }
        let stats = store.coverage_stats(&chain_id).await.unwrap();
        assert_eq!(stats.total, BigDecimal::from(5));
        assert_eq!(stats.expected, BigDecimal::from(8));
        assert_eq!(stats.missing, BigDecimal::from(3));
        assert!(stats.coverage_percent < 100.0 && stats.coverage_percent > 0.0);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn detect_gaps_finds_a_single_contiguous_hole(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        for n in [0i64, 1, 2, 6, 7] {
            store.upsert_block(&chained(1, n)).await.unwrap();
        }
        let gaps = store.detect_gaps(&chain_id, &BigDecimal::from(7)).await.unwrap();
        assert_eq!(gaps, vec![(BigDecimal::from(3), BigDecimal::from(5))]);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn detect_gaps_on_an_empty_chain_finds_nothing(pool: PgPool) {
        let store = Store::new(pool);
        let gaps = store.detect_gaps(&BigDecimal::from(1), &BigDecimal::from(100)).await.unwrap();
        assert!(gaps.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn insert_gap_then_mark_filled_drops_it_from_open_gaps(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        store.insert_gap(&chain_id, &BigDecimal::from(3), &BigDecimal::from(5)).await.unwrap();

        let open = store.list_open_gaps(&chain_id).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].status, "pending");

        store.mark_gap_status(open[0].id, "filled", 1, None).await.unwrap();
        let open_after = store.list_open_gaps(&chain_id).await.unwrap();
        assert!(open_after.is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn advance_checkpoint_cas_rejects_a_stale_expected_value(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        store.init_sync_status(&chain_id).await.unwrap();

        let advanced = store
            .advance_checkpoint(
                &chain_id,
                &BigDecimal::from(0),
                &BigDecimal::from(50),
                &BigDecimal::from(40),
                &BigDecimal::from(49),
            )
            .await
            .unwrap();
        assert!(advanced);

        // a second racer using the same stale `expected` must lose the race
        let raced = store
            .advance_checkpoint(
                &chain_id,
                &BigDecimal::from(0),
                &BigDecimal::from(50),
                &BigDecimal::from(40),
                &BigDecimal::from(49),
            )
            .await
            .unwrap();
        assert!(!raced);

        let status = store.get_sync_status(&chain_id).await.unwrap().unwrap();
        assert_eq!(status.next_block, BigDecimal::from(50));
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn save_checkpoint_then_get_latest_round_trips(pool: PgPool) {
        let store = Store::new(pool);
        store
            .save_checkpoint("tip", &BigDecimal::from(123), &h(7), None)
            .await
            .unwrap();
        let cp = store.get_latest_checkpoint("tip").await.unwrap().unwrap();
        assert_eq!(cp.block_number, BigDecimal::from(123));
        assert_eq!(cp.block_hash, h(7));

        store
            .save_checkpoint("tip", &BigDecimal::from(124), &h(8), None)
            .await
            .unwrap();
        let updated = store.get_latest_checkpoint("tip").await.unwrap().unwrap();
        assert_eq!(updated.block_number, BigDecimal::from(124));
        // upsert-by-name keeps a single row per checkpoint name
        assert_eq!(store.list_checkpoints().await.unwrap().len(), 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    async fn exists_by_hash_and_by_height_agree_with_find(pool: PgPool) {
        let store = Store::new(pool);
        let chain_id = BigDecimal::from(1);
        let b = block(1, 42, &h(42), &h(41));
        store.upsert_block(&b).await.unwrap();

        assert!(store.exists_by_hash(&h(42)).await.unwrap());
        assert!(store.exists_by_height(&chain_id, &BigDecimal::from(42)).await.unwrap());
        assert!(!store.exists_by_hash(&h(200)).await.unwrap());
        assert!(!store.exists_by_height(&chain_id, &BigDecimal::from(200)).await.unwrap());
    }
}

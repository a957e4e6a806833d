/// Domain types shared across the indexer.
///
/// Generalizes the teacher's `types.rs` (PIVX block/transaction structs plus
/// an `AppState { db, cache }` bundle) into the EVM-style data model: one
/// `Block` row type, the checkpoint/sync-status/gap rows, and an `AppState`
/// that threads the pool and shared resilience state through the app instead
/// of a raw rocksdb handle.
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::circuit_breaker::CircuitBreaker;
use crate::config::IndexerConfig;
use crate::rate_limiter::RateLimiter;
use crate::shutdown::ShutdownSequencer;

/// A canonical (or, pre-confirmation, tentative) block row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub chain_id: BigDecimal,
    pub number: BigDecimal,
    pub hash: String,
    pub parent_hash: String,
    pub timestamp: BigDecimal,
}

impl Block {
    pub fn is_genesis(&self) -> bool {
        self.number == BigDecimal::from(0)
    }
}

/// A raw block as received from `eth_getBlockByNumber`, before validation
/// has asserted the invariants that let it become a [`Block`].
#[derive(Debug, Clone, Deserialize)]
pub struct RawBlock {
    pub number: String,
    pub hash: String,
    #[serde(rename = "parentHash")]
    pub parent_hash: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: i64,
    pub name: String,
    pub block_number: BigDecimal,
    pub block_hash: String,
    pub synced_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub chain_id: BigDecimal,
    pub next_block: BigDecimal,
    pub confirmed_block: BigDecimal,
    pub head_block: BigDecimal,
}

impl SyncStatus {
    pub fn blocks_behind_tip(&self) -> BigDecimal {
        let behind = &self.head_block - &self.next_block;
        if behind < BigDecimal::from(0) {
            BigDecimal::from(0)
        } else {
            behind
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GapStatus {
    Pending,
    Retrying,
    Filled,
}

impl GapStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GapStatus::Pending => "pending",
            GapStatus::Retrying => "retrying",
            GapStatus::Filled => "filled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gap {
    pub id: i64,
    pub chain_id: BigDecimal,
    pub gap_start: BigDecimal,
    pub gap_end: BigDecimal,
    pub status: String,
    pub retry_count: i32,
}

/// Result of [`crate::store::Store::coverage_stats`]. `total`/`expected`/
/// `missing` stay in the big-integer domain throughout; only
/// `coverage_percent` ever crosses into floating point, and only for
/// display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageStats {
    pub total: BigDecimal,
    pub expected: BigDecimal,
    pub missing: BigDecimal,
    pub coverage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppLock {
    pub name: String,
    pub instance_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Shared application state handed to every task spawned from `main`.
///
/// Mirrors the teacher's `AppState { db, cache }` bundle: a single
/// `Arc<AppState>` is cloned into the sync loop, the gap-repair worker, and
/// the health server so they share one connection pool, one RPC client, and
/// one cooperative-cancellation flag.
#[derive(Clone)]
pub struct AppState {
    pub pool: sqlx::PgPool,
    pub config: Arc<IndexerConfig>,
    pub rate_limiter: Arc<RateLimiter>,
    pub breaker: Arc<CircuitBreaker>,
    pub shutdown: Arc<ShutdownSequencer>,
}

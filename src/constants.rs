/// Chain and validation constants.
///
/// Mirrors the teacher's height-constants module: named constants instead
/// of magic numbers scattered through the sync/reorg/validation code.

/// Genesis block height.
pub const HEIGHT_GENESIS: u64 = 0;

/// `0x` + 64 lowercase hex chars.
pub const HASH_HEX_LEN: usize = 66;

/// Default bound on how many heights an ancestor walk or reorg rollback may
/// cross before it is treated as a fatal, human-attention-needed event.
pub const DEFAULT_MAX_REORG_DEPTH: u64 = 1_000;

/// Default number of most-recent checkpoints retained per name.
pub const DEFAULT_CHECKPOINT_RETENTION: i64 = 10;

/// Default retention window (seconds) for filled gap rows before purge.
pub const DEFAULT_GAP_RETENTION_SECS: i64 = 7 * 24 * 60 * 60;

/// Blocks are rejected if their timestamp is further in the future than this,
/// relative to wall-clock time at validation.
pub const MAX_FUTURE_TIMESTAMP_SECS: i64 = 86_400;

/// Bound on the LRU caches used by the reorg ancestor walk and the
/// continuity-check parent lookup.
pub const HASH_LOOKUP_CACHE_CAPACITY: usize = 100;

/// TTL for `verify_chain_continuity`'s parent-by-hash lookup cache.
pub const CONTINUITY_CACHE_TTL_SECS: u64 = 60;

/// Bound on the ancestor walk's visited-hash set, FIFO-evicted once full.
pub const CYCLE_VISITED_CAPACITY: usize = 100;

#[inline]
pub fn is_genesis_height(height: u64) -> bool {
    height == HEIGHT_GENESIS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn genesis_height_is_zero() {
        assert!(is_genesis_height(0));
        assert!(!is_genesis_height(1));
    }
}

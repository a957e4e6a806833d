/// Error taxonomy.
///
/// The teacher propagates a single `MyError` / `Box<dyn std::error::Error>`
/// throughout. This system's recovery policy differs per error kind (retry,
/// fail-batch, fatal — see the error handling table in the spec), so each
/// component gets its own `thiserror` enum that the caller can match on,
/// composed into one top-level error via `#[from]`.
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("block number {0} is out of the representable range")]
    NumberOutOfRange(String),
    #[error("malformed hash field `{field}`: {value}")]
    MalformedHash { field: &'static str, value: String },
    #[error("parent_hash equals hash at height {0} (loop guard tripped)")]
    SelfParent(String),
    #[error("non-genesis block at height {0} has a zero parent_hash")]
    ZeroParentHash(String),
    #[error("timestamp {timestamp} is more than {max_skew_secs}s in the future")]
    TimestampTooFarFuture { timestamp: i64, max_skew_secs: i64 },
    #[error("big-integer field arrived in scientific notation: {0}")]
    ScientificNotation(String),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error("delete of {count} blocks above height {height} exceeds max_reorg_depth {max}")]
    ReorgTooDeep { height: String, count: u64, max: u64 },
    #[error("column `{0}` arrived as scientific notation and cannot be trusted")]
    ScientificNotation(String),
}

#[derive(Debug, Error)]
pub enum ReorgError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no common ancestor found within max_depth {max_depth} walking back from height {from}")]
    AncestorNotFound { from: String, max_depth: u64 },
    #[error("cyclic parent chain detected at hash {0} — data corruption, needs operator intervention")]
    CyclicChain(String),
    #[error("reorg at height {height} would roll back {depth} blocks, exceeding max_reorg_depth {max}")]
    TooDeep { height: String, depth: u64, max: u64 },
}

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("transport error calling {method}: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("rpc endpoint returned an error response: {0}")]
    RpcResponse(String),
    #[error("rate limited by upstream endpoint")]
    RateLimited,
    #[error("response failed validation: {0}")]
    Invalid(#[from] ValidationError),
    #[error("call timed out after {0:?}")]
    Timeout(std::time::Duration),
}

impl RpcError {
    /// Classification used by the retry combinator's `isRetriable` predicate.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RpcError::Transport { .. } | RpcError::RateLimited | RpcError::Timeout(_)
        )
    }
}

#[derive(Debug, Error)]
pub enum RateLimiterError {
    #[error("tokensPerInterval must be > 0")]
    InvalidTokensPerInterval,
    #[error("intervalMs must be > 0")]
    InvalidInterval,
    #[error("exceeded {0} retries waiting for rate limiter tokens")]
    RetriesExhausted(u32),
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("circuit breaker is open, rejecting calls until reset timeout elapses")]
    Open,
}

#[derive(Debug, Error)]
pub enum LockError {
    #[error("another instance holds lock `{0}`")]
    HeldElsewhere(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetch exhausted retries for heights: {0:?}")]
    FetchFailed(Vec<String>),
    #[error("chain discontinuity at height {height}: expected parent {expected}, got {actual}")]
    Discontinuity {
        height: String,
        expected: String,
        actual: String,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reorg(#[from] ReorgError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("checkpoint CAS missed: another instance advanced next_block first")]
    CheckpointRaced,
}

#[derive(Debug, Error)]
pub enum IndexerError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Reorg(#[from] ReorgError),
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error(transparent)]
    RateLimiter(#[from] RateLimiterError),
    #[error(transparent)]
    CircuitBreaker(#[from] CircuitBreakerError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("configuration error: {0}")]
    Config(String),
}

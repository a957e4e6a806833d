/// Ethereum-style JSON-RPC client.
///
/// The teacher talks to a PIVX node through `pivx_rpc_rs::BitcoinRpcClient`
/// over HTTP basic auth, wrapped in `spawn_blocking` since that client is
/// synchronous (see `monitor.rs`, `reorg.rs`). This tails an EVM-compatible
/// node instead, so the wire format is generic JSON-RPC 2.0 over `reqwest`,
/// natively async, round-robined across a pool of configured endpoints, and
/// every call composes the rate limiter, circuit breaker and retry
/// combinator the teacher's client never needed.
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::circuit_breaker::CircuitBreaker;
use crate::error::RpcError;
use crate::metrics;
use crate::rate_limiter::RateLimiter;
use crate::types::RawBlock;

#[derive(Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

struct Endpoint {
    url: String,
    breaker: CircuitBreaker,
}

/// Thin async JSON-RPC client. Holds one [`CircuitBreaker`] per endpoint and
/// shares a single [`RateLimiter`] across the whole pool, since the rate
/// budget is typically per-API-key rather than per-node.
pub struct RpcClient {
    http: reqwest::Client,
    endpoints: Vec<Endpoint>,
    next: AtomicUsize,
    rate_limiter: Arc<RateLimiter>,
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl RpcClient {
    pub fn new(
        urls: Vec<String>,
        timeout: Duration,
        max_retries: u32,
        retry_base_delay: Duration,
        rate_limiter: Arc<RateLimiter>,
    ) -> Self {
        let endpoints = urls
            .into_iter()
            .map(|url| Endpoint {
                breaker: CircuitBreaker::new(url.clone(), 5, Duration::from_secs(30)),
                url,
            })
            .collect();
        Self {
            http: reqwest::Client::new(),
            endpoints,
            next: AtomicUsize::new(0),
            rate_limiter,
            timeout,
            max_retries,
            retry_base_delay,
        }
    }

    fn pick_endpoint(&self) -> &Endpoint {
        let i = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[i]
    }

    async fn call_raw(&self, endpoint: &Endpoint, method: &'static str, params: Value) -> Result<Value, RpcError> {
        self.rate_limiter
            .consume(1, 100)
            .await
            .map_err(|_| RpcError::RateLimited)?;

        endpoint.breaker.before_call().map_err(|_| RpcError::RateLimited)?;

        let timer = metrics::Timer::new();
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let response = self
            .http
            .post(&endpoint.url)
            .json(&body)
            .timeout(self.timeout)
            .send()
            .await;

        metrics::record_rpc_call_duration(method, timer.elapsed_secs());

        let response = match response {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                endpoint.breaker.on_failure();
                metrics::increment_rpc_errors(method, "timeout");
                return Err(RpcError::Timeout(self.timeout));
            }
            Err(e) => {
                endpoint.breaker.on_failure();
                metrics::increment_rpc_errors(method, "transport");
                return Err(RpcError::Transport { method, source: e });
            }
        };

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            endpoint.breaker.on_failure();
            metrics::increment_rpc_errors(method, "rate_limited_http");
            return Err(RpcError::RateLimited);
        }

        let parsed: RpcResponse<Value> = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                endpoint.breaker.on_failure();
                metrics::increment_rpc_errors(method, "decode");
                return Err(RpcError::Transport { method, source: e });
            }
        };

        if let Some(err) = parsed.error {
            endpoint.breaker.on_failure();
            metrics::increment_rpc_errors(method, "rpc_error");
            return Err(RpcError::RpcResponse(format!("{} ({})", err.message, err.code)));
        }

        endpoint.breaker.on_success();
        parsed.result.ok_or_else(|| RpcError::RpcResponse("missing result field".to_string()))
    }

    async fn call_with_retry(&self, method: &'static str, params: Value) -> Result<Value, RpcError> {
        crate::retry::retry_with_backoff_scaled(
            "rpc",
            self.max_retries,
            self.retry_base_delay,
            RpcError::is_retriable,
            |err| if matches!(err, RpcError::RateLimited) { 2 } else { 1 },
            || {
                // each retry advances the round-robin index to favor a
                // different endpoint, per spec.md §4.1 Phase 1.
                let endpoint = self.pick_endpoint();
                self.call_raw(endpoint, method, params.clone())
            },
        )
        .await
    }

    pub async fn block_number(&self) -> Result<u64, RpcError> {
        let value = self.call_with_retry("eth_blockNumber", json!([])).await?;
        let hex = value.as_str().ok_or_else(|| RpcError::RpcResponse("blockNumber not a string".into()))?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|_| RpcError::RpcResponse(format!("malformed blockNumber {hex}")))
    }

    pub async fn get_block_by_number(&self, number: u64) -> Result<Option<RawBlock>, RpcError> {
        let hex_number = format!("0x{number:x}");
        let value = self
            .call_with_retry("eth_getBlockByNumber", json!([hex_number, false]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }
        let raw: RawBlock = serde_json::from_value(value)
            .map_err(|e| RpcError::RpcResponse(format!("malformed block payload: {e}")))?;
        crate::validation::validate_hash_shape(&raw)?;
        Ok(Some(raw))
    }

    pub async fn get_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Value>, RpcError> {
        let params = json!([{
            "fromBlock": format!("0x{from_block:x}"),
            "toBlock": format!("0x{to_block:x}"),
        }]);
        let value = self.call_with_retry("eth_getLogs", params).await?;
        value
            .as_array()
            .cloned()
            .ok_or_else(|| RpcError::RpcResponse("eth_getLogs result was not an array".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robins_across_endpoints() {
        let limiter = Arc::new(RateLimiter::new(1000, 1000, None).unwrap());
        let client = RpcClient::new(
            vec!["http://a".into(), "http://b".into()],
            Duration::from_secs(1),
            3,
            Duration::from_millis(100),
            limiter,
        );
        let first = client.pick_endpoint().url.clone();
        let second = client.pick_endpoint().url.clone();
        assert_ne!(first, second);
    }
}

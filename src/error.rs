use std::time::Duration;

/// Failures surfaced by the message bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The topic backlog stayed full past the publish deadline (backpressure).
    #[error("publish to '{topic}' timed out after {timeout:?}")]
    PublishTimeout { topic: String, timeout: Duration },

    /// The bus has been shut down; no further publishes or deliveries.
    #[error("broker unavailable: bus is shut down")]
    BrokerUnavailable,
}

impl BusError {
    /// Transient errors are worth retrying with backoff; a shut-down broker is not.
    pub fn is_transient(&self) -> bool {
        matches!(self, BusError::PublishTimeout { .. })
    }
}

/// Failures surfaced by the chain watcher's RPC interactions.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The RPC endpoint is unreachable; the watcher reconnects with backoff.
    #[error("rpc unavailable: {0}")]
    RpcUnavailable(String),

    /// The requested block no longer exists (reorg); skip and continue from tip.
    #[error("block {0} not found")]
    BlockNotFound(u64),
}

/// Retry an async operation with bounded exponential backoff.
/// Handles transient infrastructure errors (RPC, broker, store).
pub async fn retry_with_backoff<F, Fut, T, E>(mut f: F, max_retries: u32) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = Duration::from_millis(500);

    for attempt in 0..max_retries {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_retries,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, retrying..."
                );
                tokio::time::sleep(delay).await;
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }

    // Final attempt propagates the error to the caller
    f().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<u32, String> = retry_with_backoff(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("flaky".to_string())
                    } else {
                        Ok(42)
                    }
                }
            },
            5,
        )
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn watch_errors_distinguish_reorg_from_outage() {
        let gone = WatchError::BlockNotFound(42);
        let down = WatchError::RpcUnavailable("connection refused".to_string());
        assert_eq!(gone.to_string(), "block 42 not found");
        assert!(down.to_string().starts_with("rpc unavailable"));
        // Only a vanished block is skippable; an outage must tear the
        // session down so the reconnect loop takes over.
        assert!(matches!(gone, WatchError::BlockNotFound(_)));
        assert!(!matches!(down, WatchError::BlockNotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_exhaustion_surfaces_last_error() {
        let result: Result<u32, String> =
            retry_with_backoff(|| async { Err("down".to_string()) }, 2).await;
        assert_eq!(result.unwrap_err(), "down");
    }
}

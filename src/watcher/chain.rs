use std::sync::Arc;
use std::time::Duration;

use alloy::consensus::Transaction as _;
use alloy::providers::{Provider, ProviderBuilder, WsConnect};
use alloy::rpc::types::{Block, BlockNumberOrTag, BlockTransactions};
use futures::StreamExt;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::config::ChainConfig;
use crate::db::repository;
use crate::error::{retry_with_backoff, WatchError};
use crate::publisher::{normalize_transaction, EventPublisher};

/// Main entry point for the chain watcher task.
///
/// Loads the checkpoint, catches up to the chain tip, then switches to live
/// block subscription. Any RPC failure tears down the session and reconnects
/// with backoff; the checkpoint guarantees the watcher resumes exactly where
/// it left off, at worst redelivering the checkpoint block itself.
pub async fn run_chain_watcher(
    config: ChainConfig,
    pool: PgPool,
    publisher: Arc<EventPublisher>,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let chain_id = config.chain_id as i64;
    tracing::info!(chain = %config.name, chain_id, "Starting chain watcher");

    // Fatal by design: without a reachable checkpoint store a restart would
    // silently replay the entire chain history downstream.
    let checkpoint = repository::get_checkpoint(&pool, chain_id)
        .await
        .map_err(|e| eyre::eyre!("checkpoint store unreachable at startup: {}", e))?;

    let mut reconnect_delay = Duration::from_secs(1);
    let mut cursor = resume_block(checkpoint, config.start_block);

    while !shutdown.is_cancelled() {
        match watch_session(&config, &pool, &publisher, &mut cursor, &shutdown).await {
            Ok(()) => break,
            Err(e) => {
                tracing::warn!(
                    chain = %config.name,
                    error = %e,
                    delay_secs = reconnect_delay.as_secs(),
                    "Watch session failed, reconnecting..."
                );
                tokio::select! {
                    _ = tokio::time::sleep(reconnect_delay) => {}
                    _ = shutdown.cancelled() => break,
                }
                reconnect_delay = std::cmp::min(reconnect_delay * 2, Duration::from_secs(60));

                // Re-derive the cursor from the durable checkpoint; anything
                // published but not checkpointed is redelivered and absorbed
                // by the consumer's idempotent writes.
                let checkpoint = repository::get_checkpoint(&pool, chain_id).await?;
                cursor = resume_block(checkpoint, config.start_block);
            }
        }
    }

    tracing::info!(chain = %config.name, "Chain watcher stopped");
    Ok(())
}

/// Where to resume fetching: one past the checkpoint, else the configured
/// start block, else the current chain tip.
fn resume_block(checkpoint: Option<u64>, configured_start: Option<u64>) -> Option<u64> {
    checkpoint.map(|b| b + 1).or(configured_start)
}

/// One connected session: catch up over HTTP, then follow the tip live.
async fn watch_session(
    config: &ChainConfig,
    pool: &PgPool,
    publisher: &EventPublisher,
    cursor: &mut Option<u64>,
    shutdown: &CancellationToken,
) -> eyre::Result<()> {
    let provider = ProviderBuilder::new().connect_http(
        config
            .rpc_http
            .parse()
            .map_err(|e| eyre::eyre!("Invalid RPC URL: {}", e))?,
    );

    let chain_tip = retry_with_backoff(|| provider.get_block_number(), 5).await?;
    let mut next = cursor.unwrap_or(chain_tip);

    // Phase 1: catch up from the checkpoint to the current tip
    if next <= chain_tip {
        tracing::info!(
            chain = %config.name,
            from = next,
            to = chain_tip,
            "Catching up to chain tip"
        );
        while next <= chain_tip && !shutdown.is_cancelled() {
            process_block(&provider, pool, publisher, config, next).await?;
            next += 1;
            *cursor = Some(next);
        }
    }

    if shutdown.is_cancelled() {
        return Ok(());
    }

    // Phase 2: live subscription, WebSocket preferred
    if let Some(ws_url) = &config.rpc_ws {
        match live_watch_ws(config, ws_url, pool, publisher, &mut next, shutdown).await {
            Ok(()) => {
                *cursor = Some(next);
                return Ok(());
            }
            Err(e) => {
                *cursor = Some(next);
                tracing::warn!(
                    chain = %config.name,
                    error = %e,
                    "WebSocket subscription failed, falling back to HTTP polling"
                );
            }
        }
    }

    let result = live_watch_http(config, &provider, pool, publisher, &mut next, shutdown).await;
    *cursor = Some(next);
    result
}

/// Live watching via WebSocket block subscription.
async fn live_watch_ws(
    config: &ChainConfig,
    ws_url: &str,
    pool: &PgPool,
    publisher: &EventPublisher,
    next: &mut u64,
    shutdown: &CancellationToken,
) -> eyre::Result<()> {
    let ws = WsConnect::new(ws_url);
    let provider = ProviderBuilder::new().connect_ws(ws).await?;

    let sub = provider.subscribe_blocks().await?;
    let mut stream = sub.into_stream();

    tracing::info!(chain = %config.name, "WebSocket block subscription active");

    loop {
        tokio::select! {
            maybe_header = stream.next() => {
                match maybe_header {
                    Some(header) => {
                        // Notifications can skip numbers; walk every block so
                        // none are dropped between envelope and ledger.
                        while *next <= header.number {
                            process_block(&provider, pool, publisher, config, *next).await?;
                            *next += 1;
                        }
                    }
                    None => {
                        return Err(eyre::eyre!("block stream ended"));
                    }
                }
            }
            _ = shutdown.cancelled() => {
                tracing::info!(chain = %config.name, "Shutdown received, releasing block subscription");
                return Ok(());
            }
        }
    }
}

/// Live watching via HTTP polling (fallback when WS is unavailable).
async fn live_watch_http<P: Provider>(
    config: &ChainConfig,
    provider: &P,
    pool: &PgPool,
    publisher: &EventPublisher,
    next: &mut u64,
    shutdown: &CancellationToken,
) -> eyre::Result<()> {
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    tracing::info!(
        chain = %config.name,
        poll_interval_ms = config.poll_interval_ms,
        "HTTP polling active"
    );

    loop {
        tokio::select! {
            _ = tokio::time::sleep(poll_interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!(chain = %config.name, "Shutdown received, stopping poller");
                return Ok(());
            }
        }

        let tip = retry_with_backoff(|| provider.get_block_number(), 5).await?;

        while *next <= tip && !shutdown.is_cancelled() {
            process_block(provider, pool, publisher, config, *next).await?;
            *next += 1;
        }
    }
}

/// Fetch one block with full transaction bodies, classifying the two ways
/// it fails: the node is unreachable, or the node no longer knows the block.
async fn fetch_full_block<P: Provider>(
    provider: &P,
    block_number: u64,
) -> Result<Block, WatchError> {
    retry_with_backoff(
        || async {
            provider
                .get_block_by_number(BlockNumberOrTag::Number(block_number))
                .full()
                .await
        },
        5,
    )
    .await
    .map_err(|e| WatchError::RpcUnavailable(e.to_string()))?
    .ok_or(WatchError::BlockNotFound(block_number))
}

/// Process one block: fetch full transactions, publish each as a RawTx
/// envelope, then advance the checkpoint. The checkpoint moves only after
/// every publish was acknowledged, preserving at-least-once delivery.
async fn process_block<P: Provider>(
    provider: &P,
    pool: &PgPool,
    publisher: &EventPublisher,
    config: &ChainConfig,
    block_number: u64,
) -> eyre::Result<()> {
    let chain_id = config.chain_id as i64;

    let block = match fetch_full_block(provider, block_number).await {
        Ok(block) => block,
        Err(WatchError::BlockNotFound(n)) => {
            // A block we expected has disappeared from the node's view: a
            // reorg dropped it. Skip and continue from the tip; full
            // reconciliation is out of scope.
            tracing::warn!(
                chain = %config.name,
                block = n,
                "Block not found (reorg?), skipping"
            );
            return Ok(());
        }
        // An unreachable RPC tears down the session; the reconnect loop
        // resumes from the checkpoint.
        Err(e @ WatchError::RpcUnavailable(_)) => return Err(e.into()),
    };

    let timestamp = block.header.timestamp;
    let txs = match block.transactions {
        BlockTransactions::Full(txs) => txs,
        _ => Vec::new(),
    };
    let tx_count = txs.len();

    for tx in &txs {
        let event = normalize_transaction(
            *tx.inner.tx_hash(),
            tx.inner.signer(),
            tx.to(),
            tx.value(),
            block_number,
            timestamp,
        );
        publisher.publish(&event).await?;
    }

    repository::upsert_checkpoint(pool, chain_id, block_number as i64).await?;

    tracing::info!(
        chain = %config.name,
        block = block_number,
        transactions = tx_count,
        "Published block"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resumes_one_past_the_checkpoint() {
        assert_eq!(resume_block(Some(100), None), Some(101));
        assert_eq!(resume_block(Some(100), Some(5)), Some(101));
    }

    #[test]
    fn falls_back_to_configured_start_then_tip() {
        assert_eq!(resume_block(None, Some(50)), Some(50));
        assert_eq!(resume_block(None, None), None);
    }
}

use std::future::Future;
use std::str::FromStr;
use std::time::Duration;

use bigdecimal::BigDecimal;
use chrono::DateTime;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use crate::bus::{Delivery, Subscription};
use crate::db::{repository, TransactionRecord};
use crate::error::BusError;
use crate::event::{ChainEvent, EventKind};

/// What applying one event to the store amounted to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The write took effect.
    Applied,
    /// The keyed insert hit an existing row: duplicate delivery, a no-op.
    DuplicateIgnored,
    /// A transfer referenced an unknown token: out-of-order delivery,
    /// logged and acknowledged so the pipeline keeps moving.
    AnomalyMissingRow,
}

/// Per-message terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageDisposition {
    Applied(ApplyOutcome),
    /// Malformed payload: logged and acknowledged, never retried.
    Rejected(String),
}

/// Explicit consumption loop for one topic: receive, deserialize, apply,
/// acknowledge. The offset is committed only after the store write succeeds,
/// so a crash between write and commit merely redelivers a message the
/// idempotent write absorbs.
pub async fn run_consumer(
    topic: &str,
    pool: PgPool,
    mut sub: Subscription,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    tracing::info!(topic, "Consumer started");

    loop {
        let delivery = tokio::select! {
            delivery = sub.recv() => match delivery {
                Ok(d) => d,
                Err(BusError::BrokerUnavailable) => break,
                Err(e) => return Err(e.into()),
            },
            _ = shutdown.cancelled() => break,
        };

        let Some(disposition) = handle_delivery(&pool, topic, &delivery, &shutdown).await else {
            break;
        };
        match &disposition {
            MessageDisposition::Applied(ApplyOutcome::Applied) => {}
            MessageDisposition::Applied(ApplyOutcome::DuplicateIgnored) => {
                tracing::debug!(topic, offset = delivery.offset, "Duplicate delivery ignored");
            }
            MessageDisposition::Applied(ApplyOutcome::AnomalyMissingRow) => {
                tracing::warn!(
                    topic,
                    offset = delivery.offset,
                    key = %delivery.key,
                    "Transfer for unknown token, anomaly logged"
                );
            }
            MessageDisposition::Rejected(reason) => {
                tracing::warn!(topic, offset = delivery.offset, reason, "Message rejected as invalid");
            }
        }

        // Acknowledge only now: the write is committed (or the message is
        // poison and retrying can never help).
        sub.commit(delivery.offset);
    }

    tracing::info!(topic, "Consumer stopped");
    Ok(())
}

/// Returns `None` only when shutdown interrupts the retry loop; the message
/// is left uncommitted for redelivery on the next start.
async fn handle_delivery(
    pool: &PgPool,
    topic: &str,
    delivery: &Delivery,
    shutdown: &CancellationToken,
) -> Option<MessageDisposition> {
    let event = match ChainEvent::decode(&delivery.payload) {
        Ok(event) => event,
        Err(e) => return Some(MessageDisposition::Rejected(e.to_string())),
    };

    tracing::debug!(
        topic,
        kind = event.kind_name(),
        block = event.source_block,
        tx_hash = %event.source_tx_hash,
        "Applying event"
    );

    apply_until_done(|| apply_event(pool, &event), shutdown, topic, delivery.offset).await
}

/// Store errors are transient infrastructure failures: retry with capped
/// backoff for as long as it takes, never committing, so the pipeline
/// resumes the moment the store is reachable again instead of dying with a
/// message in flight.
async fn apply_until_done<F, Fut>(
    mut apply: F,
    shutdown: &CancellationToken,
    topic: &str,
    offset: usize,
) -> Option<MessageDisposition>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = eyre::Result<MessageDisposition>>,
{
    let mut delay = Duration::from_millis(500);

    loop {
        match apply().await {
            Ok(disposition) => return Some(disposition),
            Err(e) => {
                tracing::warn!(
                    topic,
                    offset,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Store write failed, retrying..."
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return None,
                }
                delay = std::cmp::min(delay * 2, Duration::from_secs(30));
            }
        }
    }
}

/// A keyed owner update only matches an existing row; a miss means the
/// transfer arrived before its create.
fn transfer_outcome(matched: bool) -> ApplyOutcome {
    if matched {
        ApplyOutcome::Applied
    } else {
        ApplyOutcome::AnomalyMissingRow
    }
}

/// A conflict-ignoring keyed insert that touched no row hit a duplicate.
fn insert_outcome(inserted: bool) -> ApplyOutcome {
    if inserted {
        ApplyOutcome::Applied
    } else {
        ApplyOutcome::DuplicateIgnored
    }
}

/// Apply one event to the store. Every path is idempotent: duplicate
/// deliveries of any kind converge to the same end state.
async fn apply_event(pool: &PgPool, event: &ChainEvent) -> eyre::Result<MessageDisposition> {
    let outcome = match &event.kind {
        EventKind::Transfer(transfer) => transfer_outcome(
            repository::update_nft_owner(pool, transfer.token_id, &transfer.new_owner).await?,
        ),
        EventKind::Create(create) => insert_outcome(repository::insert_nft(pool, create).await?),
        EventKind::RawTx(_) => {
            let record = match transaction_record_from(event) {
                Ok(record) => record,
                Err(reason) => return Ok(MessageDisposition::Rejected(reason)),
            };
            insert_outcome(repository::insert_transaction(pool, &record).await?)
        }
    };

    Ok(MessageDisposition::Applied(outcome))
}

/// Convert a RawTx envelope into a ledger row. Fails only on schema
/// violations (a non-decimal value), which reject the message.
fn transaction_record_from(event: &ChainEvent) -> Result<TransactionRecord, String> {
    let EventKind::RawTx(raw) = &event.kind else {
        return Err("not a raw_tx event".to_string());
    };

    let value = BigDecimal::from_str(&raw.value_wei)
        .map_err(|e| format!("invalid value_wei '{}': {}", raw.value_wei, e))?;

    let timestamp = DateTime::from_timestamp(event.timestamp as i64, 0)
        .ok_or_else(|| format!("invalid timestamp {}", event.timestamp))?;

    Ok(TransactionRecord {
        tx_hash: event.source_tx_hash.as_slice().to_vec(),
        from_address: raw.from.as_slice().to_vec(),
        to_address: raw.to.map(|a| a.as_slice().to_vec()),
        value,
        block_number: event.source_block as i64,
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, B256, U256};
    use crate::publisher::normalize_transaction;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn duplicate_writes_are_no_ops_not_errors() {
        assert_eq!(insert_outcome(true), ApplyOutcome::Applied);
        assert_eq!(insert_outcome(false), ApplyOutcome::DuplicateIgnored);
    }

    #[test]
    fn transfer_without_a_row_is_an_anomaly_not_an_error() {
        assert_eq!(transfer_outcome(true), ApplyOutcome::Applied);
        assert_eq!(transfer_outcome(false), ApplyOutcome::AnomalyMissingRow);
    }

    #[tokio::test(start_paused = true)]
    async fn store_outage_is_retried_until_the_store_recovers() {
        let shutdown = CancellationToken::new();
        let calls = AtomicU32::new(0);

        // Fails well past any bounded retry budget before recovering.
        let disposition = apply_until_done(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 10 {
                        Err(eyre::eyre!("connection refused"))
                    } else {
                        Ok(MessageDisposition::Applied(ApplyOutcome::Applied))
                    }
                }
            },
            &shutdown,
            "transactions",
            0,
        )
        .await;

        assert_eq!(
            disposition,
            Some(MessageDisposition::Applied(ApplyOutcome::Applied))
        );
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_interrupts_a_store_retry_loop() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let disposition = apply_until_done(
            || async { Err(eyre::eyre!("connection refused")) },
            &shutdown,
            "transactions",
            0,
        )
        .await;

        assert_eq!(disposition, None);
    }

    #[test]
    fn raw_tx_converts_to_ledger_row() {
        let event = normalize_transaction(
            B256::repeat_byte(0xaa),
            Address::repeat_byte(1),
            Some(Address::repeat_byte(2)),
            U256::from(1_000_000_000_000_000_000u64),
            77,
            1_700_000_000,
        );

        let record = transaction_record_from(&event).unwrap();
        assert_eq!(record.tx_hash, vec![0xaa; 32]);
        assert_eq!(record.block_number, 77);
        assert_eq!(record.value, BigDecimal::from_str("1000000000000000000").unwrap());
        assert_eq!(record.to_address, Some(vec![2u8; 20]));
    }

    #[test]
    fn contract_creation_tx_has_no_recipient() {
        let event = normalize_transaction(
            B256::repeat_byte(1),
            Address::repeat_byte(1),
            None,
            U256::ZERO,
            1,
            0,
        );
        let record = transaction_record_from(&event).unwrap();
        assert_eq!(record.to_address, None);
    }

    #[test]
    fn non_decimal_value_rejects_the_message() {
        let mut event = normalize_transaction(
            B256::repeat_byte(1),
            Address::repeat_byte(1),
            None,
            U256::ZERO,
            1,
            0,
        );
        if let EventKind::RawTx(ref mut raw) = event.kind {
            raw.value_wei = "lots".to_string();
        }
        assert!(transaction_record_from(&event).is_err());
    }
}

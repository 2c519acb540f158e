use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, B256, U256};

use crate::bus::MessageBus;
use crate::config::BusConfig;
use crate::event::{ChainEvent, EventKind, RawTxPayload};

/// Publishes normalized chain events onto the durable bus.
///
/// Publish is synchronous from the watcher's perspective: it returns only
/// once the broker has acknowledged the message, so the watcher never
/// advances its checkpoint past an unpublished event. Transient broker
/// errors retry with bounded exponential backoff; exhaustion surfaces the
/// failure so the watcher halts instead of silently dropping events.
pub struct EventPublisher {
    bus: Arc<MessageBus>,
    tx_topic: String,
    nft_topic: String,
    retries: u32,
}

impl EventPublisher {
    pub fn new(bus: Arc<MessageBus>, config: &BusConfig) -> Self {
        Self {
            bus,
            tx_topic: config.tx_topic.clone(),
            nft_topic: config.nft_topic.clone(),
            retries: config.publish_retries,
        }
    }

    fn topic_for(&self, event: &ChainEvent) -> &str {
        match event.kind {
            EventKind::RawTx(_) => &self.tx_topic,
            EventKind::Transfer(_) | EventKind::Create(_) => &self.nft_topic,
        }
    }

    pub async fn publish(&self, event: &ChainEvent) -> eyre::Result<()> {
        let topic = self.topic_for(event);
        let key = event.partition_key();
        let payload = event.encode()?;

        let mut delay = Duration::from_millis(250);
        let mut attempt = 0u32;
        loop {
            match self.bus.publish(topic, &key, payload.clone()).await {
                Ok(offset) => {
                    tracing::debug!(
                        topic,
                        offset,
                        kind = event.kind_name(),
                        tx_hash = %event.source_tx_hash,
                        "Event published"
                    );
                    return Ok(());
                }
                Err(e) if e.is_transient() && attempt < self.retries => {
                    attempt += 1;
                    tracing::warn!(
                        topic,
                        attempt,
                        max_retries = self.retries,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Publish failed, retrying..."
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(10));
                }
                Err(e) => {
                    return Err(eyre::eyre!(
                        "publish to '{}' failed after {} attempts: {}",
                        topic,
                        attempt + 1,
                        e
                    ));
                }
            }
        }
    }
}

/// Normalize a raw chain transaction into the canonical envelope. The native
/// wei value becomes a decimal string so no precision is lost on the wire.
pub fn normalize_transaction(
    tx_hash: B256,
    from: Address,
    to: Option<Address>,
    value: U256,
    block_number: u64,
    block_timestamp: u64,
) -> ChainEvent {
    ChainEvent {
        source_block: block_number,
        source_tx_hash: tx_hash,
        timestamp: block_timestamp,
        kind: EventKind::RawTx(RawTxPayload {
            from,
            to,
            value_wei: value.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn publisher_with_bus(capacity: usize) -> (Arc<MessageBus>, EventPublisher) {
        let bus = MessageBus::new(capacity, Duration::from_millis(50));
        let config = BusConfig::default();
        let publisher = EventPublisher::new(bus.clone(), &config);
        (bus, publisher)
    }

    #[test]
    fn normalization_preserves_wei_precision_as_decimal_string() {
        // More wei than f64 can represent exactly
        let value = U256::from_str("123456789012345678901234567890").unwrap();
        let event = normalize_transaction(
            B256::repeat_byte(1),
            Address::repeat_byte(2),
            Some(Address::repeat_byte(3)),
            value,
            100,
            1_700_000_000,
        );
        match event.kind {
            EventKind::RawTx(ref p) => {
                assert_eq!(p.value_wei, "123456789012345678901234567890");
            }
            _ => panic!("expected RawTx"),
        }
        assert_eq!(event.source_block, 100);
    }

    #[tokio::test]
    async fn raw_tx_and_nft_events_route_to_their_topics() {
        let (bus, publisher) = publisher_with_bus(16);

        let raw = normalize_transaction(
            B256::repeat_byte(1),
            Address::repeat_byte(2),
            None,
            U256::from(7u64),
            5,
            0,
        );
        publisher.publish(&raw).await.unwrap();

        let nft = ChainEvent {
            source_block: 5,
            source_tx_hash: B256::repeat_byte(9),
            timestamp: 0,
            kind: EventKind::Transfer(crate::event::TransferPayload {
                token_id: 1,
                new_owner: "0xB".to_string(),
            }),
        };
        publisher.publish(&nft).await.unwrap();

        let mut tx_sub = bus.subscribe("transactions");
        let mut nft_sub = bus.subscribe("nft-transactions");
        assert_eq!(
            ChainEvent::decode(&tx_sub.recv().await.unwrap().payload).unwrap(),
            raw
        );
        assert_eq!(
            ChainEvent::decode(&nft_sub.recv().await.unwrap().payload).unwrap(),
            nft
        );
    }

    #[tokio::test]
    async fn shutdown_broker_fails_fast_without_retries() {
        let (bus, publisher) = publisher_with_bus(16);
        bus.shutdown();

        let event = normalize_transaction(
            B256::repeat_byte(1),
            Address::repeat_byte(2),
            None,
            U256::ZERO,
            1,
            0,
        );
        assert!(publisher.publish(&event).await.is_err());
    }
}

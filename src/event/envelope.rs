use alloy::primitives::{Address, B256};
use serde::{Deserialize, Serialize};

/// Canonical wire envelope for one chain-derived event.
///
/// Immutable once published. `(source_tx_hash, kind)` uniquely identifies an
/// event for deduplication; the consumer's keyed writes absorb redeliveries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub source_block: u64,
    pub source_tx_hash: B256,
    pub timestamp: u64,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Kind-specific payload. Unknown `kind` tags fail deserialization, which the
/// consumer treats as a malformed message (rejected, never retried).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EventKind {
    Transfer(TransferPayload),
    Create(CreatePayload),
    RawTx(RawTxPayload),
}

/// NFT ownership change: mutates `nfts.owner` for an existing token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferPayload {
    pub token_id: i64,
    pub new_owner: String,
}

/// NFT mint: first sight inserts the row, duplicates are no-ops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatePayload {
    pub token_id: i64,
    pub name: String,
    pub level: i32,
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub image_url: String,
    pub owner: String,
}

/// A raw chain transaction destined for the append-only ledger.
/// `value_wei` is a decimal string so precision survives the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTxPayload {
    pub from: Address,
    pub to: Option<Address>,
    pub value_wei: String,
}

impl ChainEvent {
    /// Stable name of the kind tag, used in dedup identity and log fields.
    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            EventKind::Transfer(_) => "transfer",
            EventKind::Create(_) => "create",
            EventKind::RawTx(_) => "raw_tx",
        }
    }

    /// Deduplication identity for at-least-once delivery.
    pub fn dedup_key(&self) -> (B256, &'static str) {
        (self.source_tx_hash, self.kind_name())
    }

    /// Partitioning key: per-token ordering for NFT events, per-tx otherwise.
    pub fn partition_key(&self) -> String {
        match &self.kind {
            EventKind::Transfer(p) => p.token_id.to_string(),
            EventKind::Create(p) => p.token_id.to_string(),
            EventKind::RawTx(_) => format!("{:#x}", self.source_tx_hash),
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

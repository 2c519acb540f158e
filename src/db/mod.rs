pub mod repository;

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};

/// A chain transaction ready for the append-only ledger.
#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub tx_hash: Vec<u8>,
    pub from_address: Vec<u8>,
    pub to_address: Option<Vec<u8>>,
    pub value: BigDecimal,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
}

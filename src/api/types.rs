use alloy::primitives::{Address, B256, U256};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

// ============================================================
// Hex conversion helpers
// ============================================================

pub fn bytes_to_hex(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}

pub fn hex_to_bytes(hex_str: &str) -> Result<Vec<u8>, String> {
    let stripped = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    hex::decode(stripped).map_err(|e| format!("Invalid hex value: {}", e))
}

pub fn parse_eth_address(hex_str: &str) -> Result<Address, String> {
    Address::from_str(hex_str).map_err(|e| format!("Invalid address '{}': {}", hex_str, e))
}

pub fn parse_b256(hex_str: &str) -> Result<B256, String> {
    B256::from_str(hex_str).map_err(|e| format!("Invalid 32-byte hex '{}': {}", hex_str, e))
}

pub fn parse_u256_dec(value: &str) -> Result<U256, String> {
    U256::from_str(value).map_err(|e| format!("Invalid decimal value '{}': {}", value, e))
}

/// Token ids are stored signed but committed to digests unsigned; a negative
/// id must be rejected here, not wrapped.
pub fn parse_token_id(token_id: i64) -> Result<U256, String> {
    u64::try_from(token_id)
        .map(U256::from)
        .map_err(|_| format!("Invalid token_id {}: must be non-negative", token_id))
}

// ============================================================
// Query params
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionParams {
    pub address: Option<String>,
    pub from_block: Option<i64>,
    pub to_block: Option<i64>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A `toBlock` below `fromBlock` can never match anything; reject it as a
/// malformed query rather than returning a silently empty result.
pub fn validate_block_range(from_block: Option<i64>, to_block: Option<i64>) -> Result<(), String> {
    if let (Some(from), Some(to)) = (from_block, to_block) {
        if to < from {
            return Err(format!(
                "invalid block range: toBlock {} < fromBlock {}",
                to, from
            ));
        }
    }
    if from_block.is_some_and(|b| b < 0) || to_block.is_some_and(|b| b < 0) {
        return Err("block bounds must be non-negative".to_string());
    }
    Ok(())
}

// ============================================================
// Request bodies
// ============================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateSignatureRequest {
    pub token_id: i64,
    pub price: String,
    pub buyer: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyRequest {
    pub token_id: i64,
    pub price: String,
    pub seller: String,
    pub buyer: String,
    pub signature: String,
    pub nonce: String,
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub address: String,
    pub proof: Vec<String>,
}

// ============================================================
// Response types
// ============================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub total_transactions: i64,
    pub total_nfts: i64,
    pub last_published_block: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct TransactionView {
    pub tx_hash: String,
    pub from_address: String,
    pub to_address: Option<String>,
    pub value: BigDecimal,
    pub block_number: i64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct NftView {
    pub token_id: i64,
    pub name: String,
    pub level: i32,
    #[serde(rename = "trait")]
    pub trait_name: String,
    pub image_url: String,
    pub owner: String,
}

#[derive(Debug, Serialize)]
pub struct ReserveResponse {
    pub liquidity_index: String,
    pub current_liquidity_rate: String,
    pub last_update_timestamp: u64,
    pub normalized_income: String,
}

#[derive(Debug, Serialize)]
pub struct GenerateSignatureResponse {
    pub signature: String,
    pub nonce: String,
    pub seller: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyResponse {
    pub success: bool,
    pub tx_hash: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub address: String,
    pub amount_wei: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_block_range_is_invalid() {
        assert!(validate_block_range(Some(25), Some(15)).is_err());
    }

    #[test]
    fn open_ended_and_ordered_ranges_are_valid() {
        assert!(validate_block_range(None, None).is_ok());
        assert!(validate_block_range(Some(10), None).is_ok());
        assert!(validate_block_range(None, Some(10)).is_ok());
        assert!(validate_block_range(Some(10), Some(10)).is_ok());
        assert!(validate_block_range(Some(10), Some(20)).is_ok());
    }

    #[test]
    fn negative_bounds_are_invalid() {
        assert!(validate_block_range(Some(-1), None).is_err());
    }

    #[test]
    fn negative_token_ids_are_rejected_not_wrapped() {
        assert!(parse_token_id(-1).is_err());
        assert!(parse_token_id(i64::MIN).is_err());
        assert_eq!(parse_token_id(0).unwrap(), U256::ZERO);
        assert_eq!(parse_token_id(7).unwrap(), U256::from(7u64));
    }

    #[test]
    fn hex_helpers_round_trip() {
        let bytes = vec![0xde, 0xad, 0xbe, 0xef];
        assert_eq!(hex_to_bytes(&bytes_to_hex(&bytes)).unwrap(), bytes);
        assert!(hex_to_bytes("0xzz").is_err());
    }
}

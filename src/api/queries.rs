use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::types::*;

// ============================================================
// Health
// ============================================================

pub async fn get_health(pool: &PgPool) -> eyre::Result<HealthResponse> {
    let (total_transactions,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM transactions")
        .fetch_one(pool)
        .await?;

    let (total_nfts,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM nfts")
        .fetch_one(pool)
        .await?;

    let checkpoint: Option<(i64,)> = sqlx::query_as(
        "SELECT last_published_block FROM relay_state ORDER BY chain_id LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(HealthResponse {
        status: "ok".to_string(),
        total_transactions,
        total_nfts,
        last_published_block: checkpoint.map(|(b,)| b),
    })
}

// ============================================================
// Transactions
// ============================================================

/// Filtered, paginated transaction listing. Filters are conjunctive; a
/// missing field imposes no constraint. Ordered by block number ascending —
/// read-committed: a row is visible here iff the consumer committed it.
pub async fn list_transactions(
    pool: &PgPool,
    address: Option<Vec<u8>>,
    from_block: Option<i64>,
    to_block: Option<i64>,
    limit: i64,
    offset: i64,
) -> eyre::Result<Vec<TransactionView>> {
    let mut qb: sqlx::QueryBuilder<sqlx::Postgres> = sqlx::QueryBuilder::new(
        "SELECT tx_hash, from_address, to_address, value, block_number, timestamp
         FROM transactions WHERE 1=1",
    );

    if let Some(addr) = address {
        qb.push(" AND (from_address = ")
            .push_bind(addr.clone())
            .push(" OR to_address = ")
            .push_bind(addr)
            .push(")");
    }
    if let Some(from) = from_block {
        qb.push(" AND block_number >= ").push_bind(from);
    }
    if let Some(to) = to_block {
        qb.push(" AND block_number <= ").push_bind(to);
    }

    qb.push(" ORDER BY block_number ASC, tx_hash ASC");
    qb.push(" LIMIT ").push_bind(limit);
    qb.push(" OFFSET ").push_bind(offset);

    let rows: Vec<(
        Vec<u8>,
        Vec<u8>,
        Option<Vec<u8>>,
        BigDecimal,
        i64,
        DateTime<Utc>,
    )> = qb.build_query_as().fetch_all(pool).await?;

    Ok(rows
        .into_iter()
        .map(
            |(tx_hash, from_address, to_address, value, block_number, timestamp)| {
                TransactionView {
                    tx_hash: bytes_to_hex(&tx_hash),
                    from_address: bytes_to_hex(&from_address),
                    to_address: to_address.as_deref().map(bytes_to_hex),
                    value,
                    block_number,
                    timestamp,
                }
            },
        )
        .collect())
}

// ============================================================
// NFTs
// ============================================================

pub async fn list_nfts(pool: &PgPool) -> eyre::Result<Vec<NftView>> {
    let rows: Vec<(i64, String, i32, String, String, String)> = sqlx::query_as(
        "SELECT token_id, name, level, trait, image_url, owner
         FROM nfts ORDER BY token_id ASC",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(token_id, name, level, trait_name, image_url, owner)| NftView {
            token_id,
            name,
            level,
            trait_name,
            image_url,
            owner,
        })
        .collect())
}

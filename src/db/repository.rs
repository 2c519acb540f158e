use bigdecimal::BigDecimal;
use sqlx::PgPool;

use crate::db::TransactionRecord;
use crate::event::CreatePayload;

/// Insert a transaction into the append-only ledger. A duplicate `tx_hash`
/// is absorbed by the primary key and reported as `false` (idempotent
/// success on redelivery), never an error.
pub async fn insert_transaction(
    pool: &PgPool,
    record: &TransactionRecord,
) -> eyre::Result<bool> {
    let result = sqlx::query(
        "INSERT INTO transactions (tx_hash, from_address, to_address, value, block_number, timestamp)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (tx_hash) DO NOTHING",
    )
    .bind(&record.tx_hash)
    .bind(&record.from_address)
    .bind(&record.to_address)
    .bind(&record.value)
    .bind(record.block_number)
    .bind(record.timestamp)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Insert an NFT on first sight. A duplicate `token_id` is a no-op.
pub async fn insert_nft(pool: &PgPool, nft: &CreatePayload) -> eyre::Result<bool> {
    let result = sqlx::query(
        "INSERT INTO nfts (token_id, name, level, trait, image_url, owner)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (token_id) DO NOTHING",
    )
    .bind(nft.token_id)
    .bind(&nft.name)
    .bind(nft.level)
    .bind(&nft.trait_name)
    .bind(&nft.image_url)
    .bind(&nft.owner)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Move ownership of an existing NFT. Returns `false` when no row matched,
/// which the consumer logs as an out-of-order anomaly.
pub async fn update_nft_owner(
    pool: &PgPool,
    token_id: i64,
    new_owner: &str,
) -> eyre::Result<bool> {
    let result = sqlx::query("UPDATE nfts SET owner = $1 WHERE token_id = $2")
        .bind(new_owner)
        .bind(token_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

/// Current owner of a token, if it exists.
pub async fn nft_owner(pool: &PgPool, token_id: i64) -> eyre::Result<Option<String>> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT owner FROM nfts WHERE token_id = $1")
            .bind(token_id)
            .fetch_optional(pool)
            .await?;

    Ok(row.map(|(owner,)| owner))
}

/// Last block the watcher fully published, or None if never checkpointed.
pub async fn get_checkpoint(pool: &PgPool, chain_id: i64) -> eyre::Result<Option<u64>> {
    let row: Option<(i64,)> = sqlx::query_as(
        "SELECT last_published_block FROM relay_state WHERE chain_id = $1",
    )
    .bind(chain_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|(b,)| b as u64))
}

/// Advance the watcher checkpoint. Called only after every event from the
/// block was acknowledged by the bus.
pub async fn upsert_checkpoint(
    pool: &PgPool,
    chain_id: i64,
    block_number: i64,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO relay_state (chain_id, last_published_block, updated_at)
         VALUES ($1, $2, NOW())
         ON CONFLICT (chain_id) DO UPDATE
         SET last_published_block = $2, updated_at = NOW()",
    )
    .bind(chain_id)
    .bind(block_number)
    .execute(pool)
    .await?;

    Ok(())
}

/// Record an airdrop claim. Returns `false` when the address already claimed.
pub async fn insert_airdrop_claim(pool: &PgPool, address: &[u8]) -> eyre::Result<bool> {
    let result = sqlx::query(
        "INSERT INTO airdrop_claims (address) VALUES ($1)
         ON CONFLICT (address) DO NOTHING",
    )
    .bind(address)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mirrored reserve snapshot: `(liquidity_index, current_liquidity_rate, last_update_timestamp)`.
pub async fn get_reserve_state(
    pool: &PgPool,
) -> eyre::Result<Option<(BigDecimal, BigDecimal, i64)>> {
    let row: Option<(BigDecimal, BigDecimal, i64)> = sqlx::query_as(
        "SELECT liquidity_index, current_liquidity_rate, last_update_timestamp
         FROM reserve_state WHERE id = 1",
    )
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Upsert the mirrored reserve snapshot. GREATEST keeps the liquidity index
/// and update timestamp non-decreasing even under redelivered updates.
pub async fn upsert_reserve_state(
    pool: &PgPool,
    liquidity_index: &BigDecimal,
    current_liquidity_rate: &BigDecimal,
    last_update_timestamp: i64,
) -> eyre::Result<()> {
    sqlx::query(
        "INSERT INTO reserve_state (id, liquidity_index, current_liquidity_rate, last_update_timestamp)
         VALUES (1, $1, $2, $3)
         ON CONFLICT (id) DO UPDATE
         SET liquidity_index = GREATEST(reserve_state.liquidity_index, EXCLUDED.liquidity_index),
             current_liquidity_rate = EXCLUDED.current_liquidity_rate,
             last_update_timestamp = GREATEST(reserve_state.last_update_timestamp, EXCLUDED.last_update_timestamp)",
    )
    .bind(liquidity_index)
    .bind(current_liquidity_rate)
    .bind(last_update_timestamp)
    .execute(pool)
    .await?;

    Ok(())
}

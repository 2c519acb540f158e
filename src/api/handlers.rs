use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::sync::Arc;

use alloy::primitives::{keccak256, Signature, B256};
use rand::RngCore;

use super::queries;
use super::types::*;
use super::AppState;
use crate::db::repository;
use crate::event::{ChainEvent, EventKind, TransferPayload};
use crate::market::{self, merkle};
use crate::reserve;

/// Wei granted per successful airdrop claim (1 token).
const CLAIM_AMOUNT_WEI: &str = "1000000000000000000";

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse { error: msg.into() }),
    )
}

fn internal_error(e: eyre::Report) -> (StatusCode, Json<ErrorResponse>) {
    api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    queries::get_health(&state.pool)
        .await
        .map(Json)
        .map_err(internal_error)
}

// ============================================================
// Transactions & NFTs
// ============================================================

pub async fn list_transactions(
    State(state): State<Arc<AppState>>,
    Query(params): Query<TransactionParams>,
) -> ApiResult<Vec<TransactionView>> {
    validate_block_range(params.from_block, params.to_block)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let address = params
        .address
        .as_deref()
        .map(hex_to_bytes)
        .transpose()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let limit = params.limit.unwrap_or(100).clamp(1, 1000);
    let offset = params.offset.unwrap_or(0).max(0);

    queries::list_transactions(
        &state.pool,
        address,
        params.from_block,
        params.to_block,
        limit,
        offset,
    )
    .await
    .map(Json)
    .map_err(internal_error)
}

pub async fn list_nfts(State(state): State<Arc<AppState>>) -> ApiResult<Vec<NftView>> {
    queries::list_nfts(&state.pool)
        .await
        .map(Json)
        .map_err(internal_error)
}

// ============================================================
// Reserve mirror
// ============================================================

pub async fn get_reserve(State(state): State<Arc<AppState>>) -> ApiResult<ReserveResponse> {
    let now = chrono::Utc::now().timestamp() as u64;
    let snapshot = reserve::load_or_seed(&state.pool, now)
        .await
        .map_err(internal_error)?;

    Ok(Json(ReserveResponse {
        liquidity_index: snapshot.liquidity_index.to_string(),
        current_liquidity_rate: snapshot.current_liquidity_rate.to_string(),
        last_update_timestamp: snapshot.last_update_timestamp,
        normalized_income: snapshot.normalized_income(now).to_string(),
    }))
}

// ============================================================
// Marketplace purchase flow
// ============================================================

pub async fn generate_signature(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GenerateSignatureRequest>,
) -> ApiResult<GenerateSignatureResponse> {
    let token_id = parse_token_id(req.token_id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let buyer = parse_eth_address(&req.buyer)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let price = parse_u256_dec(&req.price)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let seller = repository::nft_owner(&state.pool, req.token_id)
        .await
        .map_err(internal_error)?
        .ok_or_else(|| {
            api_error(
                StatusCode::NOT_FOUND,
                format!("unknown token {}", req.token_id),
            )
        })?;

    let mut nonce_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = B256::from(nonce_bytes);

    let signature = state
        .signer
        .sign_purchase(token_id, price, buyer, nonce)
        .map_err(internal_error)?;

    Ok(Json(GenerateSignatureResponse {
        signature: bytes_to_hex(&signature.as_bytes()),
        nonce: bytes_to_hex(nonce.as_slice()),
        seller,
    }))
}

/// Execute a purchase. The signature check is pure and runs before any
/// effect: a failed verification aborts with zero state change and zero bus
/// publish. Ownership itself converges through the consumer applying the
/// published Transfer event.
pub async fn buy(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BuyRequest>,
) -> ApiResult<BuyResponse> {
    let token_id = parse_token_id(req.token_id)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let buyer = parse_eth_address(&req.buyer)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let price = parse_u256_dec(&req.price)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;
    let nonce = parse_b256(&req.nonce)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let verification_failed =
        || api_error(StatusCode::BAD_REQUEST, "signature verification failed");

    let sig_bytes = hex_to_bytes(&req.signature).map_err(|_| verification_failed())?;
    let signature = Signature::from_raw(&sig_bytes).map_err(|_| verification_failed())?;

    let verified = market::verify_purchase_signature(
        token_id,
        price,
        buyer,
        nonce,
        &signature,
        state.signer.address(),
    );
    if !verified {
        return Err(verification_failed());
    }

    let tx_hash = keccak256(&sig_bytes);
    let event = ChainEvent {
        source_block: 0,
        source_tx_hash: tx_hash,
        timestamp: chrono::Utc::now().timestamp() as u64,
        kind: EventKind::Transfer(TransferPayload {
            token_id: req.token_id,
            new_owner: req.buyer.clone(),
        }),
    };

    state.publisher.publish(&event).await.map_err(internal_error)?;

    tracing::info!(
        token_id = req.token_id,
        buyer = %req.buyer,
        seller = %req.seller,
        tx_hash = %tx_hash,
        "Purchase verified and published"
    );

    Ok(Json(BuyResponse {
        success: true,
        tx_hash: bytes_to_hex(tx_hash.as_slice()),
    }))
}

// ============================================================
// Airdrop claim flow
// ============================================================

pub async fn claim_airdrop(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClaimRequest>,
) -> ApiResult<ClaimResponse> {
    let root = state
        .airdrop_root
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "airdrop not configured"))?;

    let address = parse_eth_address(&req.address)
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    let proof = req
        .proof
        .iter()
        .map(|p| parse_b256(p))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| api_error(StatusCode::BAD_REQUEST, e))?;

    // Verification first, writes after: an invalid proof leaves no trace.
    if !merkle::verify_merkle_proof(merkle::address_leaf(address), &proof, root) {
        return Err(api_error(StatusCode::BAD_REQUEST, "invalid merkle proof"));
    }

    let claimed = repository::insert_airdrop_claim(&state.pool, address.as_slice())
        .await
        .map_err(internal_error)?;
    if !claimed {
        return Err(api_error(StatusCode::CONFLICT, "already claimed"));
    }

    tracing::info!(address = %address, "Airdrop claim recorded");

    Ok(Json(ClaimResponse {
        address: req.address,
        amount_wei: CLAIM_AMOUNT_WEI.to_string(),
    }))
}

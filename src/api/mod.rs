pub mod handlers;
pub mod queries;
pub mod types;

use alloy::primitives::B256;
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::market::MarketSigner;
use crate::publisher::EventPublisher;

pub struct AppState {
    pub pool: PgPool,
    pub publisher: Arc<EventPublisher>,
    pub signer: Arc<MarketSigner>,
    pub airdrop_root: Option<B256>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health))
        .route("/api/transactions", get(handlers::list_transactions))
        .route("/api/nfts", get(handlers::list_nfts))
        .route("/api/reserve", get(handlers::get_reserve))
        .route("/api/generate-signature", post(handlers::generate_signature))
        .route("/api/buy", post(handlers::buy))
        .route("/api/airdrop/claim", post(handlers::claim_airdrop))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(
    state: Arc<AppState>,
    host: &str,
    port: u16,
    shutdown: CancellationToken,
) -> eyre::Result<()> {
    let app = router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await?;
    tracing::info!("API server stopped");
    Ok(())
}

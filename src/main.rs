use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use chainrelay::api::{self, AppState};
use chainrelay::bus::MessageBus;
use chainrelay::config::Config;
use chainrelay::consumer::run_consumer;
use chainrelay::market::MarketSigner;
use chainrelay::publisher::EventPublisher;
use chainrelay::watcher::chain::run_chain_watcher;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    color_eyre::install()?;

    // Initialize structured logging (set RUST_LOG=info for output)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    tracing::info!("ChainRelay starting");

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path)?;
    tracing::info!(chain = %config.chain.name, "Configuration loaded from {}", config_path);

    // Create database connection pool
    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await
        .map_err(|e| eyre::eyre!("Failed to connect to database: {}", e))?;

    tracing::info!("Connected to PostgreSQL");

    // Run migrations
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| eyre::eyre!("Failed to run migrations: {}", e))?;

    tracing::info!("Database migrations complete");

    // Seed the mirrored reserve snapshot
    let now = chrono::Utc::now().timestamp() as u64;
    chainrelay::reserve::load_or_seed(&pool, now).await?;

    // Durable bus connecting watcher, purchase flow, and consumers
    let bus = MessageBus::new(
        config.bus.capacity,
        Duration::from_millis(config.bus.publish_timeout_ms),
    );
    let publisher = Arc::new(EventPublisher::new(bus.clone(), &config.bus));

    // Marketplace signing key and airdrop root
    let signer = Arc::new(MarketSigner::from_hex_key(&config.market.signer_key)?);
    let airdrop_root = config
        .airdrop
        .merkle_root
        .as_deref()
        .map(api::types::parse_b256)
        .transpose()
        .map_err(|e| eyre::eyre!(e))?;

    // Create shutdown signal
    let shutdown = CancellationToken::new();
    let mut handles = Vec::new();

    // Spawn one consumer per topic
    for topic in [config.bus.tx_topic.clone(), config.bus.nft_topic.clone()] {
        let pool = pool.clone();
        let sub = bus.subscribe(&topic);
        let shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = run_consumer(&topic, pool, sub, shutdown).await {
                tracing::error!(topic = %topic, error = %e, "Consumer failed");
            }
        });
        handles.push(handle);
    }

    // Spawn API server
    if config.api.enabled {
        let state = Arc::new(AppState {
            pool: pool.clone(),
            publisher: publisher.clone(),
            signer,
            airdrop_root,
        });
        let host = config.api.host.clone();
        let port = config.api.port;
        let shutdown = shutdown.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = api::serve(state, &host, port, shutdown).await {
                tracing::error!(error = %e, "API server failed");
            }
        });
        handles.push(handle);
    }

    // Spawn the chain watcher
    {
        let chain_config = config.chain.clone();
        let pool = pool.clone();
        let publisher = publisher.clone();
        let shutdown = shutdown.clone();
        let chain_name = chain_config.name.clone();
        let handle = tokio::spawn(async move {
            if let Err(e) = run_chain_watcher(chain_config, pool, publisher, shutdown).await {
                tracing::error!(chain = %chain_name, error = %e, "Chain watcher failed");
            }
        });
        handles.push(handle);
    }

    tracing::info!("Relay pipeline started. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received, stopping pipeline...");
    shutdown.cancel();
    bus.shutdown();

    // Wait for all tasks to finish
    for handle in handles {
        let _ = handle.await;
    }

    tracing::info!("ChainRelay stopped gracefully");
    Ok(())
}

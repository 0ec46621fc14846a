pub mod api;
pub mod config;
pub mod error;
pub mod logic;
pub mod model;
pub mod store;

// Export API types
pub use api::handlers;
pub use api::routes;

pub use error::{Error, Result};

pub use logic::{parse_expand, Expander};

// Export all model types
pub use model::*;

// Export store types
pub use store::{MemoryStore, PostgresStore, Store};

/// Load `.env` and configuration, pick the store and serve until shutdown.
pub async fn run_server() -> anyhow::Result<()> {
    use axum::serve;
    use env_logger::Builder;
    use log::LevelFilter;
    use std::sync::Arc;
    use tokio::net::TcpListener;

    // Load environment variables from .env file if it exists
    dotenvy::dotenv().ok();

    // Initialize logging with explicit filter to suppress sqlx debug logs
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter_module("sqlx", LevelFilter::Warn)
        .parse_default_env()
        .init();

    log::info!("coll-db: multi-tenant collection store");

    let config = config::AppConfig::load()?;
    log::info!(
        "Configuration loaded: server={}:{}",
        config.server.host,
        config.server.port
    );

    let app: axum::Router = if config.database.in_memory {
        log::warn!("Using the in-memory store; data will not survive a restart");
        api::routes::create_router().with_state(Arc::new(MemoryStore::new()))
    } else {
        log::info!("Connecting to PostgreSQL...");
        let store =
            PostgresStore::shared(&config.database_url(), config.max_connections()).await?;
        log::info!("Database ready");
        api::routes::create_router().with_state(Arc::new(store))
    };

    let bind_address = config.server_address();
    let listener = TcpListener::bind(&bind_address).await?;
    log::info!("coll-db server running on http://{}", bind_address);

    serve(listener, app).await?;

    Ok(())
}

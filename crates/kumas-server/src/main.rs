use std::net::SocketAddr;

use tracing::info;

use kumas_api::state::AppStateInner;
use kumas_api::tokens::TokenKeys;
use kumas_db::Database;
use kumas_gateway::dispatcher::Dispatcher;
use kumas_server::{build_router, config::Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kumas=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    let db = Database::open(&config.db_path)?;
    std::fs::create_dir_all(&config.upload_dir)?;

    // Shared state; one dispatcher (and connection registry) for the process
    let state = AppStateInner::new(
        db,
        Dispatcher::new(),
        TokenKeys::new(&config.jwt_access_secret, &config.jwt_refresh_secret),
        config.upload_dir.clone(),
    );

    let app = build_router(state, &config.api_prefix);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("kumas server listening on {} (api at '{}')", addr, config.api_prefix);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

//! Inkpost - blog content-management backend

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkpost::{
    api::{self, AppState},
    config::Config,
    db::{self, ConnectionManager},
};

/// Interval between background database pings
const MONITOR_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkpost=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Inkpost v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yml"));
    let config = Arc::new(Config::load_with_env(&config_path)?);
    tracing::info!("Configuration loaded from {}", config_path.display());
    if let Err(e) = config.validate() {
        tracing::warn!("{}", e);
    }

    // Connect, retrying per the configured policy
    let manager = Arc::new(ConnectionManager::from_config(&config.database));
    let pool = manager
        .connect(&config.database.url)
        .await
        .context("Database unavailable")?;
    tracing::info!("Database connected: {:?}", config.database.driver);

    // Run migrations
    db::migrations::run_migrations(&pool).await?;
    tracing::info!("Database migrations completed");

    let _monitor = manager.spawn_monitor(MONITOR_INTERVAL);

    // Build router
    let state = AppState::new(config.clone(), manager.clone());
    let app = api::build_router(state);

    // Start server
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(db::wait_for_signal())
        .await?;

    tracing::info!("Shutting down");
    manager.disconnect().await;
    Ok(())
}

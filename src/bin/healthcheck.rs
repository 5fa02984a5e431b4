//! Standalone health probe
//!
//! Runs the same checks as `GET /api/health` against the configured
//! database and storage, prints the JSON report and exits with status 1
//! when unhealthy. Suitable for container health checks.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use inkpost::{
    config::Config,
    db::{ConnectionManager, RetryPolicy, SqlxConnector},
    health::HealthChecker,
};

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so stdout carries only the report
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "inkpost=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yml"));
    let config = Arc::new(Config::load_with_env(&config_path)?);

    // One attempt: a probe should report, not wait
    let manager = Arc::new(ConnectionManager::new(
        Arc::new(SqlxConnector::for_driver(config.database.driver)),
        RetryPolicy {
            max_attempts: 1,
            delay: Duration::ZERO,
        },
    ));
    if let Err(e) = manager.connect(&config.database.url).await {
        tracing::warn!("{}", e);
    }

    let report = HealthChecker::from_config(config, Some(manager.clone()))
        .run_checks()
        .await;
    manager.disconnect().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.is_healthy() {
        std::process::exit(1);
    }
    Ok(())
}

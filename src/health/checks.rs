//! Built-in health checks
//!
//! - `config`: required settings present and well-formed
//! - `database`: the connection manager holds a handle that answers a ping
//! - `storage`: object storage endpoint reachable (only when configured)
//! - `memory`: process resident memory under the configured ceiling

use anyhow::Context;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, System};

use super::{CheckOutcome, HealthChecker};
use crate::config::{Config, StorageConfig};
use crate::db::ConnectionManager;
use crate::error::{retry, AppError};

/// Attempts made by the storage probe
const STORAGE_ATTEMPTS: u32 = 3;

/// Base backoff delay of the storage probe
const STORAGE_BACKOFF: Duration = Duration::from_millis(200);

const BYTES_PER_MB: u64 = 1024 * 1024;

impl HealthChecker {
    /// Checker with every built-in check that applies to `config`.
    ///
    /// The database check is registered only when a manager is supplied, the
    /// storage check only when an endpoint is configured.
    pub fn from_config(config: Arc<Config>, manager: Option<Arc<ConnectionManager>>) -> Self {
        let mut checker = HealthChecker::new();

        let cfg = config.clone();
        checker.register("config", move || {
            let cfg = cfg.clone();
            async move { check_config(&cfg) }
        });

        if let Some(manager) = manager {
            checker.register("database", move || {
                let manager = manager.clone();
                async move { check_database(&manager).await }
            });
        }

        if config.storage.is_enabled() {
            let probe = StorageProbe::new(
                &config.storage,
                Duration::from_secs(config.health.storage_timeout_secs),
            );
            match probe {
                Ok(probe) => {
                    let probe = Arc::new(probe);
                    checker.register("storage", move || {
                        let probe = probe.clone();
                        async move { probe.check().await }
                    });
                }
                Err(e) => tracing::warn!("Storage probe disabled: {:#}", e),
            }
        }

        let max_memory_mb = config.health.max_memory_mb;
        checker.register("memory", move || async move { check_memory(max_memory_mb).await });

        checker
    }
}

pub fn check_config(config: &Config) -> CheckOutcome {
    config.validate()?;
    Ok(Some(json!({
        "driver": config.database.driver,
        "storage": config.storage.is_enabled(),
    })))
}

pub async fn check_database(manager: &ConnectionManager) -> CheckOutcome {
    let pool = manager.pool().await?;
    pool.ping().await.context("Database ping failed")?;
    Ok(Some(json!({
        "status": manager.status(),
        "driver": pool.driver(),
    })))
}

/// HEAD request against the bucket URL
pub struct StorageProbe {
    client: reqwest::Client,
    url: String,
    attempts: u32,
    backoff: Duration,
}

impl StorageProbe {
    pub fn new(storage: &StorageConfig, timeout: Duration) -> anyhow::Result<Self> {
        let url = storage
            .probe_url()
            .context("storage.endpoint is not configured")?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url,
            attempts: STORAGE_ATTEMPTS,
            backoff: STORAGE_BACKOFF,
        })
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.attempts = attempts;
        self.backoff = backoff;
        self
    }

    /// Any response below 500 counts as reachable; access denied still proves
    /// the endpoint is up.
    pub async fn check(&self) -> CheckOutcome {
        let status = retry(|| self.head(), self.attempts, self.backoff)
            .await
            .with_context(|| format!("Object storage unreachable at {}", self.url))?;
        Ok(Some(json!({ "url": self.url, "status": status })))
    }

    async fn head(&self) -> Result<u16, AppError> {
        let response = self.client.head(&self.url).send().await?;
        let status = response.status().as_u16();
        if status >= 500 {
            return Err(AppError::api(status, format!("HEAD {} returned {}", self.url, status)));
        }
        Ok(status)
    }
}

pub async fn check_memory(max_memory_mb: u64) -> CheckOutcome {
    let rss = tokio::task::spawn_blocking(resident_memory)
        .await
        .context("Memory probe task failed")??;
    let rss_mb = rss / BYTES_PER_MB;
    if rss_mb > max_memory_mb {
        anyhow::bail!(
            "Resident memory {} MB exceeds the {} MB limit",
            rss_mb,
            max_memory_mb
        );
    }
    Ok(Some(json!({ "rssMb": rss_mb, "maxMb": max_memory_mb })))
}

/// Resident set size of this process in bytes
fn resident_memory() -> anyhow::Result<u64> {
    let mut sys = System::new_all();
    sys.refresh_all();
    let pid = Pid::from_u32(std::process::id());
    sys.process(pid)
        .map(|p| p.memory())
        .context("Current process not found in the process table")
}

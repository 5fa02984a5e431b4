//! Database connection manager
//!
//! One `ConnectionManager` is built at startup and shared as an
//! `Arc<ConnectionManager>`. It owns the single database handle, retries the
//! initial connection with a fixed delay, publishes status changes on a
//! `watch` channel and tears the handle down on shutdown.

use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::pool::{create_pool, redact, DynDatabasePool};
use crate::config::{DatabaseConfig, DatabaseDriver};

/// Lifecycle state of the managed handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Connecting,
    Disconnecting,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Disconnecting => "disconnecting",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixed-delay retry policy for establishing the connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(5),
        }
    }
}

impl From<&DatabaseConfig> for RetryPolicy {
    fn from(config: &DatabaseConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.retry_delay(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Database URI is not configured")]
    MissingUri,
    #[error("Could not connect to the database after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },
    #[error("Database is not connected")]
    NotConnected,
}

/// Opens a database handle for a URI.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, uri: &str) -> anyhow::Result<DynDatabasePool>;
}

/// Production connector backed by sqlx pools
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector {
    driver: Option<DatabaseDriver>,
}

impl SqlxConnector {
    /// Connector using `driver` for URIs without an explicit scheme
    pub fn for_driver(driver: DatabaseDriver) -> Self {
        Self { driver: Some(driver) }
    }

    /// Pool settings for `uri`. A `mysql://` or `sqlite:` scheme always wins.
    fn config_for(&self, uri: &str) -> DatabaseConfig {
        let mut config = DatabaseConfig::from_url(uri);
        if DatabaseDriver::from_scheme(uri).is_none() {
            if let Some(driver) = self.driver {
                config.driver = driver;
            }
        }
        config
    }
}

#[async_trait]
impl Connector for SqlxConnector {
    async fn connect(&self, uri: &str) -> anyhow::Result<DynDatabasePool> {
        let pool = create_pool(&self.config_for(uri)).await?;
        pool.ping().await?;
        Ok(pool)
    }
}

#[derive(Default)]
struct State {
    pool: Option<DynDatabasePool>,
    target: Option<String>,
}

pub struct ConnectionManager {
    connector: Arc<dyn Connector>,
    policy: RetryPolicy,
    /// Serialises connect and disconnect
    op_lock: Mutex<()>,
    state: Mutex<State>,
    status: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, policy: RetryPolicy) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            connector,
            policy,
            op_lock: Mutex::new(()),
            state: Mutex::new(State::default()),
            status,
        }
    }

    /// Manager using sqlx pools and the retry settings from `config`
    pub fn from_config(config: &DatabaseConfig) -> Self {
        Self::new(
            Arc::new(SqlxConnector::for_driver(config.driver)),
            RetryPolicy::from(config),
        )
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Establish the connection, retrying with a fixed delay.
    ///
    /// Connecting again to the current target while connected returns the
    /// existing handle. Any other call closes the old handle first.
    pub async fn connect(&self, uri: &str) -> Result<DynDatabasePool, ConnectionError> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(ConnectionError::MissingUri);
        }

        let _op = self.op_lock.lock().await;

        {
            let state = self.state.lock().await;
            if let (Some(pool), Some(target)) = (&state.pool, &state.target) {
                if target == uri && self.is_connected() {
                    debug!("Already connected to {}", redact(uri));
                    return Ok(pool.clone());
                }
            }
        }

        self.close_current().await;

        self.set_status(ConnectionStatus::Connecting);
        let attempts = self.policy.max_attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.connector.connect(uri).await {
                Ok(pool) => {
                    let mut state = self.state.lock().await;
                    state.pool = Some(pool.clone());
                    state.target = Some(uri.to_string());
                    drop(state);

                    self.set_status(ConnectionStatus::Connected);
                    info!("Database connected: {} (attempt {})", redact(uri), attempt);
                    return Ok(pool);
                }
                Err(e) => {
                    warn!(
                        "Database connection attempt {}/{} failed: {:#}",
                        attempt, attempts, e
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.policy.delay).await;
                    }
                }
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        Err(ConnectionError::RetriesExhausted {
            attempts,
            source: last_error.unwrap_or_else(|| anyhow::anyhow!("no connection attempt was made")),
        })
    }

    /// Close the handle. Calling this while disconnected does nothing.
    pub async fn disconnect(&self) {
        let _op = self.op_lock.lock().await;
        self.close_current().await;
    }

    async fn close_current(&self) {
        let pool = {
            let mut state = self.state.lock().await;
            state.target = None;
            state.pool.take()
        };

        if let Some(pool) = pool {
            self.set_status(ConnectionStatus::Disconnecting);
            pool.close().await;
            info!("Database disconnected");
        }
        self.set_status(ConnectionStatus::Disconnected);
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// URI of the current connection, if any
    pub async fn target(&self) -> Option<String> {
        self.state.lock().await.target.clone()
    }

    /// The live handle. Fails instead of waiting when no connection exists.
    pub async fn pool(&self) -> Result<DynDatabasePool, ConnectionError> {
        self.state
            .lock()
            .await
            .pool
            .clone()
            .ok_or(ConnectionError::NotConnected)
    }

    /// Receive every status change from now on
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn set_status(&self, next: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            debug!("Database status: {}", next);
        }
    }

    /// Ping the handle every `interval`, flipping the status on failure and recovery.
    ///
    /// The task stops once the manager is dropped.
    pub fn spawn_monitor(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let manager: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.check_once().await;
            }
        })
    }

    async fn check_once(&self) {
        let Ok(pool) = self.pool().await else {
            return;
        };

        match pool.ping().await {
            Ok(()) => {
                if self.status() == ConnectionStatus::Disconnected && self.same_pool(&pool).await {
                    info!("Database connection restored");
                    self.set_status(ConnectionStatus::Connected);
                }
            }
            Err(e) => {
                if self.status() == ConnectionStatus::Connected && self.same_pool(&pool).await {
                    warn!("Database connection lost: {:#}", e);
                    self.set_status(ConnectionStatus::Disconnected);
                }
            }
        }
    }

    async fn same_pool(&self, pool: &DynDatabasePool) -> bool {
        self.state
            .lock()
            .await
            .pool
            .as_ref()
            .map(|current| Arc::ptr_eq(current, pool))
            .unwrap_or(false)
    }

    /// Disconnect once `trigger` completes
    pub fn shutdown_on<F>(self: &Arc<Self>, trigger: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            trigger.await;
            info!("Closing database connection");
            manager.disconnect().await;
        })
    }

    /// Disconnect on Ctrl-C or SIGTERM
    pub fn shutdown_on_signal(self: &Arc<Self>) -> JoinHandle<()> {
        self.shutdown_on(wait_for_signal())
    }
}

/// Resolves when the process receives Ctrl-C or SIGTERM.
pub async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Connector that always fails and counts how often it was asked
    struct RefusingConnector {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, uri: &str) -> anyhow::Result<DynDatabasePool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("connection refused: {}", uri)
        }
    }

    /// Real sqlite connector that counts calls
    struct CountingConnector {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self, uri: &str) -> anyhow::Result<DynDatabasePool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            SqlxConnector::default().connect(uri).await
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::ZERO,
        }
    }

    fn counting_manager() -> (Arc<CountingConnector>, Arc<ConnectionManager>) {
        let connector = Arc::new(CountingConnector {
            calls: AtomicU32::new(0),
        });
        let manager = Arc::new(ConnectionManager::new(connector.clone(), fast_policy(3)));
        (connector, manager)
    }

    #[tokio::test]
    async fn test_empty_uri_fails_without_attempts() {
        let connector = Arc::new(RefusingConnector {
            calls: AtomicU32::new(0),
        });
        let manager = ConnectionManager::new(connector.clone(), fast_policy(3));

        let err = manager.connect("   ").await.err().expect("empty uri must fail");

        assert!(matches!(err, ConnectionError::MissingUri));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let connector = Arc::new(RefusingConnector {
            calls: AtomicU32::new(0),
        });
        let manager = ConnectionManager::new(connector.clone(), fast_policy(4));

        let err = manager
            .connect("mysql://nobody@127.0.0.1:1/none")
            .await
            .err()
            .expect("unreachable target must fail");

        match err {
            ConnectionError::RetriesExhausted { attempts, source } => {
                assert_eq!(attempts, 4);
                assert!(source.to_string().contains("connection refused"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(connector.calls.load(Ordering::SeqCst), 4);
        assert!(!manager.is_connected());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(matches!(manager.pool().await, Err(ConnectionError::NotConnected)));
    }

    #[tokio::test]
    async fn test_zero_attempts_still_tries_once() {
        let connector = Arc::new(RefusingConnector {
            calls: AtomicU32::new(0),
        });
        let manager = ConnectionManager::new(connector.clone(), fast_policy(0));

        assert!(manager.connect("data/x.db").await.is_err());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_and_disconnect() {
        let (_, manager) = counting_manager();

        manager.connect(":memory:").await.expect("connect");
        assert!(manager.is_connected());
        assert_eq!(manager.status(), ConnectionStatus::Connected);
        assert_eq!(manager.target().await.as_deref(), Some(":memory:"));
        manager.pool().await.expect("pool").ping().await.expect("ping");

        manager.disconnect().await;
        assert!(!manager.is_connected());
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager.target().await.is_none());

        // Idempotent
        manager.disconnect().await;
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_same_target_is_noop() {
        let (connector, manager) = counting_manager();

        let first = manager.connect(":memory:").await.expect("connect");
        let second = manager.connect(":memory:").await.expect("connect again");

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(connector.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_new_target_replaces_handle() {
        let (connector, manager) = counting_manager();
        let dir = tempfile::tempdir().expect("tempdir");
        let file = dir.path().join("other.db");

        let first = manager.connect(":memory:").await.expect("connect");
        let second = manager
            .connect(&file.to_string_lossy())
            .await
            .expect("connect elsewhere");

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(first.is_closed());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert!(manager.is_connected());
    }

    #[tokio::test]
    async fn test_listeners_see_transitions() {
        let (_, manager) = counting_manager();
        let mut rx = manager.subscribe();
        assert_eq!(*rx.borrow(), ConnectionStatus::Disconnected);

        manager.connect(":memory:").await.expect("connect");
        rx.changed().await.expect("status change");
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Connected);

        manager.disconnect().await;
        rx.changed().await.expect("status change");
        assert_eq!(*rx.borrow_and_update(), ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_monitor_marks_lost_connection() {
        let (_, manager) = counting_manager();
        let pool = manager.connect(":memory:").await.expect("connect");

        // Close the pool behind the manager's back
        pool.close().await;
        manager.check_once().await;

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(manager.pool().await.is_ok());
    }

    #[tokio::test]
    async fn test_reconnect_after_lost_connection_opens_new_handle() {
        let (connector, manager) = counting_manager();
        let lost = manager.connect(":memory:").await.expect("connect");
        lost.close().await;
        manager.check_once().await;
        assert_eq!(manager.status(), ConnectionStatus::Disconnected);

        let fresh = manager.connect(":memory:").await.expect("reconnect");

        assert!(!Arc::ptr_eq(&lost, &fresh));
        assert!(!fresh.is_closed());
        assert_eq!(connector.calls.load(Ordering::SeqCst), 2);
        assert!(manager.is_connected());
        fresh.ping().await.expect("ping");
    }

    #[test]
    fn test_url_scheme_overrides_configured_driver() {
        let connector = SqlxConnector::for_driver(DatabaseDriver::Sqlite);
        let config = connector.config_for("mysql://root:pw@127.0.0.1:1/inkpost");
        assert_eq!(config.driver, DatabaseDriver::Mysql);

        let connector = SqlxConnector::for_driver(DatabaseDriver::Mysql);
        assert_eq!(connector.config_for("sqlite::memory:").driver, DatabaseDriver::Sqlite);
        assert_eq!(connector.config_for("data/blog.db").driver, DatabaseDriver::Mysql);
        assert_eq!(SqlxConnector::default().config_for("data/blog.db").driver, DatabaseDriver::Sqlite);
    }

    #[tokio::test]
    async fn test_monitor_task_stops_with_manager() {
        let (_, manager) = counting_manager();
        let handle = manager.spawn_monitor(Duration::from_millis(5));
        drop(manager);

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("monitor should exit")
            .expect("monitor should not panic");
    }

    #[tokio::test]
    async fn test_shutdown_on_trigger_disconnects() {
        let (_, manager) = counting_manager();
        manager.connect(":memory:").await.expect("connect");

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = manager.shutdown_on(async move {
            let _ = rx.await;
        });

        tx.send(()).expect("send trigger");
        handle.await.expect("shutdown task");

        assert_eq!(manager.status(), ConnectionStatus::Disconnected);
        assert!(matches!(manager.pool().await, Err(ConnectionError::NotConnected)));
    }

    #[test]
    fn test_policy_from_config() {
        let config = DatabaseConfig {
            max_attempts: 2,
            retry_delay_ms: 1500,
            ..DatabaseConfig::default()
        };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.delay, Duration::from_millis(1500));
        assert_eq!(RetryPolicy::default().max_attempts, 5);
    }
}

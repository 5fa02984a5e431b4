//! Health checker
//!
//! Holds an ordered list of named async checks and runs them into a
//! `HealthReport`. Checks are independent: each runs even if an earlier one
//! failed, and a panicking check is recorded as a failure.
//!
//! Built-in checks live in [`checks`].

pub mod checks;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Outcome of a check: optional details on success
pub type CheckOutcome = anyhow::Result<Option<serde_json::Value>>;

type CheckFn = Arc<dyn Fn() -> BoxFuture<'static, CheckOutcome> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of one named check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    /// Wall time in milliseconds
    pub duration: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Full error chain
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl CheckResult {
    pub fn passed(&self) -> bool {
        self.status == CheckStatus::Pass
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }

    pub fn check(&self, name: &str) -> Option<&CheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// Ordered set of named health checks
#[derive(Clone, Default)]
pub struct HealthChecker {
    checks: Vec<(String, CheckFn)>,
}

impl HealthChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a check. Registering an existing name replaces it in place.
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, check: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CheckOutcome> + Send + 'static,
    {
        let name = name.into();
        let check: CheckFn = Arc::new(move || check().boxed());
        match self.checks.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = check,
            None => self.checks.push((name, check)),
        }
        self
    }

    /// Registered names in run order
    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every check in order and aggregate the results
    pub async fn run_checks(&self) -> HealthReport {
        let mut results = Vec::with_capacity(self.checks.len());
        for (name, check) in &self.checks {
            results.push(run_one(name, check).await);
        }

        let status = if results.iter().all(CheckResult::passed) {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unhealthy
        };
        if status == HealthStatus::Unhealthy {
            let failed: Vec<&str> = results
                .iter()
                .filter(|r| !r.passed())
                .map(|r| r.name.as_str())
                .collect();
            tracing::warn!("Health checks failed: {}", failed.join(", "));
        }

        HealthReport {
            status,
            timestamp: Utc::now(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            checks: results,
        }
    }
}

async fn run_one(name: &str, check: &CheckFn) -> CheckResult {
    let started = Instant::now();
    // The check is invoked inside the future so a panic while building it is caught too
    let outcome = AssertUnwindSafe(async { check().await }).catch_unwind().await;
    let duration = started.elapsed().as_millis() as u64;

    let (status, details, error, stack) = match outcome {
        Ok(Ok(details)) => (CheckStatus::Pass, details, None, None),
        Ok(Err(err)) => (
            CheckStatus::Fail,
            None,
            Some(err.to_string()),
            Some(format!("{:?}", err)),
        ),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            (
                CheckStatus::Fail,
                None,
                Some(format!("Check panicked: {}", message)),
                None,
            )
        }
    };

    if let Some(error) = &error {
        tracing::debug!("Health check '{}' failed in {}ms: {}", name, duration, error);
    }

    CheckResult {
        name: name.to_string(),
        status,
        duration,
        details,
        error,
        stack,
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

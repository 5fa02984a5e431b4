//! Application error taxonomy and retry helper
//!
//! `AppError` is the closed set of failures surfaced to users and to
//! outbound-call wrappers. `retry` re-runs an async operation with
//! exponential backoff and jitter while its errors are retryable.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Largest exponent applied to the base delay
const MAX_BACKOFF_SHIFT: u32 = 16;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AppError {
    /// Remote service answered with an error status
    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    /// No usable response (connect failure, timeout, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// Input rejected, per field
    #[error("Invalid {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        AppError::Api {
            status,
            message: message.into(),
        }
    }

    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// HTTP status associated with the error, where one exists
    pub fn status(&self) -> Option<u16> {
        match self {
            AppError::Api { status, .. } => Some(*status),
            AppError::Auth(_) => Some(401),
            AppError::Validation { .. } => Some(400),
            AppError::Network(_) | AppError::Unexpected(_) => None,
        }
    }

    /// Message safe to show an end user
    pub fn user_message(&self) -> String {
        match self {
            AppError::Api { status, .. } => message_for_status(*status).to_string(),
            AppError::Network(_) => {
                "Unable to reach the server. Check your connection and try again.".to_string()
            }
            AppError::Validation { message, .. } => message.clone(),
            AppError::Auth(_) => "Your session has expired. Please sign in again.".to_string(),
            AppError::Unexpected(_) => "An unexpected error occurred. Please try again.".to_string(),
        }
    }

    /// Whether repeating the same request could succeed.
    ///
    /// Client errors are final except 408 and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Api { status, .. } => !(400..500).contains(status) || *status == 408 || *status == 429,
            AppError::Network(_) | AppError::Unexpected(_) => true,
            AppError::Validation { .. } | AppError::Auth(_) => false,
        }
    }
}

/// Human-readable message for an HTTP status code
pub fn message_for_status(status: u16) -> &'static str {
    match status {
        400 => "The request was invalid. Please check your input.",
        401 => "Please sign in to continue.",
        403 => "You do not have permission to do that.",
        404 => "The requested resource was not found.",
        408 => "The request timed out. Please try again.",
        409 => "This conflicts with existing data.",
        413 => "The request is too large.",
        422 => "Some of the submitted fields are invalid.",
        429 => "Too many requests. Please wait a moment and try again.",
        502..=504 => "The service is temporarily unavailable. Please try again shortly.",
        500..=599 => "Something went wrong on our side. Please try again later.",
        _ => "An unexpected error occurred. Please try again.",
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => AppError::api(status.as_u16(), err.to_string()),
            None if err.is_builder() => AppError::Unexpected(err.to_string()),
            None => AppError::Network(err.to_string()),
        }
    }
}

/// Delay before the retry that follows failed attempt number `attempt` (1-based):
/// `base * 2^(attempt-1)` plus uniform jitter in `[0, base)`
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(MAX_BACKOFF_SHIFT);
    let exponential = base.saturating_mul(1u32 << shift);
    let base_ms = base.as_millis() as u64;
    let jitter = if base_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..base_ms)
    };
    exponential.saturating_add(Duration::from_millis(jitter))
}

/// Run `op` up to `max_attempts` times (at least once).
///
/// Non-retryable errors are returned immediately; otherwise the last error
/// is returned once attempts run out.
pub async fn retry<T, F, Fut>(mut op: F, max_attempts: u32, base_delay: Duration) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if !err.is_retryable() || attempt >= max_attempts => return Err(err),
            Err(err) => {
                let delay = backoff_delay(base_delay, attempt);
                tracing::debug!(
                    "Attempt {}/{} failed: {}; retrying in {:?}",
                    attempt,
                    max_attempts,
                    err,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

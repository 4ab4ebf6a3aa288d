//! Outbound ports: the daemon, the price source and daemon notifications.

use crate::domain::event::Notification;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

/// Errors from the daemon.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum UpstreamError {
    /// The call did not complete within its deadline.
    #[error("upstream call timed out")]
    Timeout,
    /// The daemon could not be reached or the exchange was cut short.
    #[error("upstream transport failure: {0}")]
    Transport(String),
    /// The daemon rejected the call.
    #[error("upstream error {code}: {message}")]
    Application { code: i64, message: String },
}

impl UpstreamError {
    pub fn application(code: i64, message: impl Into<String>) -> Self {
        UpstreamError::Application {
            code,
            message: message.into(),
        }
    }
}

/// Request/response access to the daemon's JSON-RPC interface.
///
/// `params` is either a positional array or a named object.
#[async_trait]
pub trait UpstreamClient: Send + Sync {
    /// Interactive call. Implementations may serialize these.
    async fn call(&self, method: &str, params: Value, timeout: Duration)
        -> Result<Value, UpstreamError>;

    /// Long-running wait. Must not hold up interactive calls.
    async fn long_poll(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, UpstreamError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("rate source failed: {0}")]
pub struct RateError(pub String);

/// External BTC/USD rate.
#[async_trait]
pub trait RateSource: Send + Sync {
    /// Current rate, formatted as the source reports it.
    async fn fetch_rate(&self) -> Result<String, RateError>;
}

/// Notifications pushed by the daemon.
#[async_trait]
pub trait NotificationSource: Send {
    /// Next notification, or `None` once the source is exhausted.
    async fn next_notification(&mut self) -> Option<Notification>;
}

//! Gateway-level errors.

use crate::domain::config::ConfigError;

/// Errors that stop the gateway from starting or serving.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Server socket bind error
    #[error("server bind error: {0}")]
    Bind(String),

    /// Initial invoice cursor could not be read from the daemon
    #[error("cannot acquire initial invoice cursor: {0}")]
    InitialCursor(String),

    /// Event broker stopped
    #[error("event broker unavailable")]
    BrokerClosed,

    /// Service started twice
    #[error("gateway already started")]
    AlreadyStarted,

    /// Internal server error
    #[error("internal error: {0}")]
    Internal(String),
}

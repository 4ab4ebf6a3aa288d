//! # Sparkgate Telemetry
//!
//! Structured logging for the gateway: an `EnvFilter` driven by the
//! environment and either human-readable or JSON lines.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sg_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     init_telemetry(&TelemetryConfig::from_env()).expect("Failed to init telemetry");
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SG_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `SG_JSON_LOGS` | `false` | JSON output (on by default in containers) |
//! | `SG_SERVICE_NAME` | `sparkgate` | Service name |

mod config;
mod subscriber;

pub use config::{LogOutput, TelemetryConfig};
pub use subscriber::build_filter;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Invalid log filter: {0}")]
    Filter(String),

    #[error("Failed to install subscriber: {0}")]
    Init(String),
}

/// Install the global log subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    subscriber::init_subscriber(config)
}

//! Telemetry configuration from environment variables.

use std::env;

/// Where log lines go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogOutput {
    #[default]
    Stdout,
    /// Required when stdout carries a protocol, as in plugin mode.
    Stderr,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log filter directive (`info`, `sg_gateway=debug,info`, ...)
    pub log_level: String,

    /// Whether to emit JSON formatted logs
    pub json_logs: bool,

    /// Log destination
    pub output: LogOutput,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "sparkgate".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            output: LogOutput::Stdout,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `SG_SERVICE_NAME`: Service name (default: sparkgate)
    /// - `SG_LOG_LEVEL` or `RUST_LOG`: Log filter (default: info)
    /// - `SG_JSON_LOGS`: Enable JSON logs (default: false outside containers)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let is_container =
            lookup("KUBERNETES_SERVICE_HOST").is_some() || lookup("DOCKER_CONTAINER").is_some();

        Self {
            service_name: lookup("SG_SERVICE_NAME").unwrap_or_else(|| "sparkgate".to_string()),

            log_level: lookup("SG_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),

            json_logs: lookup("SG_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),

            output: LogOutput::Stdout,
        }
    }

    /// Send logs to stderr instead of stdout.
    pub fn with_stderr(mut self) -> Self {
        self.output = LogOutput::Stderr;
        self
    }
}

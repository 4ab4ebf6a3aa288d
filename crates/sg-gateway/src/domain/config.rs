//! Gateway configuration with validation.

use crate::domain::permissions::Profile;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Main gateway configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP server configuration
    pub http: HttpConfig,
    /// Credential and keyring configuration
    pub auth: AuthConfig,
    /// Upstream timeouts and backoff
    pub timeouts: TimeoutConfig,
    /// Event stream configuration
    pub stream: StreamConfig,
    /// Price ticker configuration
    pub price: PriceConfig,
    /// Daemon notification topics forwarded to the stream
    pub notifications: NotificationConfig,
    /// CORS configuration
    pub cors: CorsConfig,
}

impl GatewayConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mode = self.auth.mode.ok_or(ConfigError::AuthModeUnset)?;

        if mode == AuthMode::Required && self.auth.login.is_none() && self.auth.keys.is_empty() {
            return Err(ConfigError::NoCredentials);
        }

        if let Some(login) = &self.auth.login {
            if login.is_empty() {
                return Err(ConfigError::Invalid("login cannot be empty".into()));
            }
        }

        for (key, entry) in &self.auth.keys {
            if key.trim().is_empty() {
                return Err(ConfigError::Invalid("key cannot be empty".into()));
            }
            if let Some(profile) = &entry.profile {
                if Profile::from_name(profile).is_none() {
                    return Err(ConfigError::UnknownProfile(profile.clone()));
                }
            }
        }

        if self.timeouts.rpc.is_zero() {
            return Err(ConfigError::InvalidTimeout("rpc timeout cannot be 0".into()));
        }
        if self.timeouts.invoice_poll.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "invoice_poll timeout cannot be 0".into(),
            ));
        }
        if self.stream.keepalive.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "stream keepalive cannot be 0".into(),
            ));
        }
        if self.price.enabled && self.price.interval.is_zero() {
            return Err(ConfigError::InvalidTimeout(
                "price interval cannot be 0".into(),
            ));
        }

        if self.stream.client_buffer == 0 {
            return Err(ConfigError::InvalidLimit(
                "client_buffer cannot be 0".into(),
            ));
        }

        Ok(())
    }

    /// Get HTTP server bind address
    pub fn http_addr(&self) -> SocketAddr {
        SocketAddr::new(self.http.host, self.http.port)
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Bind address
    pub host: IpAddr,
    /// Port (default: 9737)
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9737,
        }
    }
}

/// Whether requests must carry a recognized credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    Required,
    /// Every request runs with full access.
    Disabled,
}

impl std::str::FromStr for AuthMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "required" => Ok(AuthMode::Required),
            "disabled" => Ok(AuthMode::Disabled),
            other => Err(ConfigError::Invalid(format!("unknown auth mode '{}'", other))),
        }
    }
}

/// Credential configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Must be set explicitly; there is no default.
    pub mode: Option<AuthMode>,
    /// Operator login (`user:password`). Its derived access key has full access.
    pub login: Option<String>,
    /// Additional keys and their permissions.
    pub keys: BTreeMap<String, KeyEntry>,
}

/// Permissions for one configured key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyEntry {
    pub allowed_methods: Vec<String>,
    pub disallowed_methods: Vec<String>,
    /// Named profile; replaces every other field when set.
    pub profile: Option<String>,
    pub pay_max_satoshis: Option<u64>,
}

impl KeyEntry {
    pub fn allow<I: IntoIterator<Item = S>, S: Into<String>>(methods: I) -> Self {
        Self {
            allowed_methods: methods.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn deny<I: IntoIterator<Item = S>, S: Into<String>>(methods: I) -> Self {
        Self {
            disallowed_methods: methods.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn profile(name: impl Into<String>) -> Self {
        Self {
            profile: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_pay_max(mut self, satoshis: u64) -> Self {
        self.pay_max_satoshis = Some(satoshis);
        self
    }
}

/// Timeout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Forwarded RPC calls
    #[serde(with = "humantime_serde")]
    pub rpc: Duration,
    /// Invoice long-poll
    #[serde(with = "humantime_serde")]
    pub invoice_poll: Duration,
    /// Wait after a failed background poll
    #[serde(with = "humantime_serde")]
    pub error_backoff: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            rpc: Duration::from_secs(30),
            invoice_poll: Duration::from_secs(60 * 60),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// Event stream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Idle time before a keepalive comment is sent
    #[serde(with = "humantime_serde")]
    pub keepalive: Duration,
    /// Reconnect delay advertised to clients
    #[serde(with = "humantime_serde")]
    pub retry: Duration,
    /// Per-client queue capacity; a full queue disconnects the client
    pub client_buffer: usize,
    /// Recent events kept for `Last-Event-ID` resume
    pub backlog: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            keepalive: Duration::from_secs(250),
            retry: Duration::from_secs(3),
            client_buffer: 64,
            backlog: 256,
        }
    }
}

/// Price ticker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceConfig {
    pub enabled: bool,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
        }
    }
}

/// Daemon notification passthrough
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub topics: Vec<String>,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            topics: [
                "channel_opened",
                "channel_open_failed",
                "channel_state_changed",
                "connect",
                "disconnect",
                "invoice_payment",
                "invoice_creation",
                "warning",
                "forward_event",
                "sendpay_success",
                "sendpay_failure",
                "coin_movement",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

/// CORS configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allow any origin, method and header
    pub allow_all: bool,
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `auth.mode` missing
    #[error("auth.mode must be set to \"required\" or \"disabled\"")]
    AuthModeUnset,
    /// Authentication required but nothing to authenticate with
    #[error("auth.mode is \"required\" but no login or keys are configured")]
    NoCredentials,
    /// Key references a profile that does not exist
    #[error("unknown permission profile '{0}'")]
    UnknownProfile(String),
    /// Invalid size or count limit
    #[error("invalid limit: {0}")]
    InvalidLimit(String),
    /// Invalid timeout value
    #[error("invalid timeout: {0}")]
    InvalidTimeout(String),
    /// General configuration error
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Humantime serde module for Duration serialization
pub mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() != 0 {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        } else {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse_duration(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"250ms"`, `"30s"`, `"5m"`, `"1h"` or plain seconds.
    pub fn parse_duration(s: &str) -> Result<Duration, &'static str> {
        let s = s.trim();
        // "ms" must be tried before "m" and "s".
        if let Some(ms) = s.strip_suffix("ms") {
            ms.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .map_err(|_| "invalid milliseconds")
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid seconds")
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.trim()
                .parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(|_| "invalid minutes")
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .trim()
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(|_| "invalid hours")
        } else {
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| "invalid duration format")
        }
    }
}

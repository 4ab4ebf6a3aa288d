//! Runtime configuration: TOML file, then environment, then CLI flags.

use serde::{Deserialize, Serialize};
use sg_gateway::domain::config::humantime_serde;
use sg_gateway::domain::permissions::Profile;
use sg_gateway::{AuthMode, ConfigError, GatewayConfig, KeyEntry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Everything the executable needs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(flatten)]
    pub gateway: GatewayConfig,
    pub daemon: DaemonConfig,
}

/// How to reach the Lightning daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// JSON-RPC unix socket
    pub rpc_file: PathBuf,
    /// Wait between startup connection attempts
    #[serde(with = "humantime_serde")]
    pub connect_backoff: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            rpc_file: PathBuf::from("lightning-rpc"),
            connect_backoff: Duration::from_secs(5),
        }
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid {name}: {reason}")]
    Env { name: &'static str, reason: String },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Read the TOML file, or start from defaults when there is none.
pub fn load_file(path: Option<&Path>) -> Result<RuntimeConfig, LoadError> {
    let Some(path) = path else {
        return Ok(RuntimeConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply `SG_*` overrides from the process environment.
pub fn apply_env(config: &mut RuntimeConfig) -> Result<(), LoadError> {
    apply_overrides(config, |name| std::env::var(name).ok())
}

/// Apply `SG_*` overrides from `lookup`.
///
/// - `SG_HOST`, `SG_PORT`: listen address
/// - `SG_AUTH_MODE`: `required` or `disabled`
/// - `SG_LOGIN`: operator login
/// - `SG_KEYS`: extra keys in the compact form, see [`parse_keys`]
/// - `SG_RPC_FILE`: daemon socket
pub fn apply_overrides(
    config: &mut RuntimeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), LoadError> {
    if let Some(host) = lookup("SG_HOST") {
        config.gateway.http.host = host.parse().map_err(|_| LoadError::Env {
            name: "SG_HOST",
            reason: format!("'{host}' is not an IP address"),
        })?;
    }
    if let Some(port) = lookup("SG_PORT") {
        config.gateway.http.port = port.parse().map_err(|_| LoadError::Env {
            name: "SG_PORT",
            reason: format!("'{port}' is not a port"),
        })?;
    }
    if let Some(mode) = lookup("SG_AUTH_MODE") {
        config.gateway.auth.mode = Some(mode.parse::<AuthMode>()?);
    }
    if let Some(login) = lookup("SG_LOGIN") {
        config.gateway.auth.login = Some(login);
    }
    if let Some(keys) = lookup("SG_KEYS") {
        config.gateway.auth.keys.extend(parse_keys(&keys)?);
    }
    if let Some(rpc_file) = lookup("SG_RPC_FILE") {
        config.daemon.rpc_file = PathBuf::from(rpc_file);
    }
    Ok(())
}

/// Parse the compact key list.
///
/// Entries are separated by `;`. Each is a key, optionally followed by `:`
/// and a comma-separated list of `+method` (allow), `-method` (deny),
/// `pay-max=<sat>` or a profile name:
///
/// ```text
/// key1; key2: +getinfo,+listpeers; key3: -pay,-sendpay; key4: readonly
/// ```
///
/// A bare key has full access.
pub fn parse_keys(list: &str) -> Result<BTreeMap<String, KeyEntry>, ConfigError> {
    let mut keys = BTreeMap::new();

    for entry in list.split(';').map(str::trim).filter(|e| !e.is_empty()) {
        let (key, permissions) = match entry.split_once(':') {
            Some((key, permissions)) => (key.trim(), permissions),
            None => (entry, ""),
        };
        if key.is_empty() {
            return Err(ConfigError::Invalid(format!("missing key in '{entry}'")));
        }

        let mut parsed = KeyEntry::default();
        for item in permissions.split(',').map(str::trim).filter(|i| !i.is_empty()) {
            if let Some(method) = item.strip_prefix('+') {
                parsed.allowed_methods.push(method.trim().to_string());
            } else if let Some(method) = item.strip_prefix('-') {
                parsed.disallowed_methods.push(method.trim().to_string());
            } else if let Some(limit) = item.strip_prefix("pay-max=") {
                let limit = limit
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidLimit(format!("pay-max '{limit}'")))?;
                parsed.pay_max_satoshis = Some(limit);
            } else if Profile::from_name(item).is_some() {
                parsed.profile = Some(item.to_string());
            } else {
                return Err(ConfigError::UnknownProfile(item.to_string()));
            }
        }

        keys.insert(key.to_string(), parsed);
    }

    Ok(keys)
}

//! Startup checks run before the gateway starts serving.

use serde_json::{json, Value};
use sg_gateway::domain::LoginTokens;
use sg_gateway::UpstreamClient;
use std::time::Duration;
use tracing::{info, warn};

/// What the daemon says about itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeIdentity {
    pub id: String,
    pub alias: String,
    pub blockheight: u64,
    pub version: String,
}

impl NodeIdentity {
    fn from_getinfo(info: &Value) -> Self {
        let text = |field: &str| {
            info.get(field)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Self {
            id: text("id"),
            alias: text("alias"),
            blockheight: info.get("blockheight").and_then(Value::as_u64).unwrap_or(0),
            version: text("version"),
        }
    }
}

/// Call `getinfo` until the daemon answers, waiting `backoff` between tries.
pub async fn wait_for_daemon(
    upstream: &dyn UpstreamClient,
    timeout: Duration,
    backoff: Duration,
) -> NodeIdentity {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match upstream.call("getinfo", json!([]), timeout).await {
            Ok(info) => {
                let node = NodeIdentity::from_getinfo(&info);
                info!(
                    id = %node.id,
                    alias = %node.alias,
                    blockheight = node.blockheight,
                    version = %node.version,
                    "Connected to Lightning daemon"
                );
                return node;
            }
            Err(e) => {
                warn!(attempt, error = %e, retry_in = ?backoff, "Daemon not reachable yet");
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Log what a wallet UI needs from the login. The access key itself stays
/// out of the logs.
pub fn log_login(tokens: Option<&LoginTokens>) {
    match tokens {
        Some(tokens) => info!(manifest_key = %tokens.manifest, "Login configured"),
        None => info!("No login configured"),
    }
}

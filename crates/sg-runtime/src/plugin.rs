//! Daemon plugin protocol.
//!
//! When the daemon launches us as a plugin it speaks JSON-RPC over our stdin
//! and stdout: `getmanifest`, then `init` with our options and its socket
//! path, then a notification for every subscribed topic. Logs must go to
//! stderr while this runs.

use crate::config::{apply_overrides, LoadError, RuntimeConfig};
use serde_json::{json, Value};
use sg_gateway::Notification;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Set by the daemon in the environment of every plugin it starts.
pub const PLUGIN_ENV: &str = "LIGHTNINGD_PLUGIN";

const SHUTDOWN_TOPIC: &str = "shutdown";
const METHOD_NOT_FOUND: i64 = -32601;

/// Options registered with the daemon, and the `SG_*` override each feeds.
const OPTIONS: [(&str, &str, &str); 5] = [
    ("sparkgate-host", "SG_HOST", "HTTP listen address"),
    ("sparkgate-port", "SG_PORT", "HTTP listen port"),
    ("sparkgate-login", "SG_LOGIN", "full-access login, \"user:password\""),
    ("sparkgate-keys", "SG_KEYS", "extra keys, \"key: +method,-method,profile; ...\""),
    ("sparkgate-auth", "SG_AUTH_MODE", "\"required\" or \"disabled\""),
];
const CORS_OPTION: &str = "sparkgate-allow-cors";

/// Plugin protocol errors
#[derive(Debug, thiserror::Error)]
pub enum PluginError {
    #[error("plugin i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("plugin protocol error: {0}")]
    Protocol(String),
}

/// A message from the daemon.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    GetManifest { id: Value },
    Init { id: Value, params: Value },
    Notification(Notification),
    Shutdown,
    /// A request we do not serve.
    Unknown { id: Option<Value>, method: String },
}

impl Inbound {
    pub fn classify(mut message: Value) -> Result<Self, PluginError> {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| PluginError::Protocol("message without method".into()))?
            .to_string();
        let id = message.get("id").filter(|id| !id.is_null()).cloned();
        let params = message.get_mut("params").map(Value::take).unwrap_or(Value::Null);

        Ok(match (method.as_str(), id) {
            ("getmanifest", Some(id)) => Inbound::GetManifest { id },
            ("init", Some(id)) => Inbound::Init { id, params },
            (SHUTDOWN_TOPIC, None) => Inbound::Shutdown,
            (_, None) => Inbound::Notification(Notification {
                topic: method,
                params,
            }),
            (_, id) => Inbound::Unknown { id, method },
        })
    }
}

/// The `getmanifest` answer: our options and the topics we subscribe to.
pub fn manifest(topics: &[String]) -> Value {
    let mut options: Vec<Value> = OPTIONS
        .iter()
        .map(|(name, _, description)| {
            json!({"name": name, "type": "string", "description": description})
        })
        .collect();
    options.push(json!({
        "name": CORS_OPTION,
        "type": "bool",
        "default": false,
        "description": "allow cross-origin requests from any origin",
    }));

    let mut subscriptions: Vec<&str> = topics.iter().map(String::as_str).collect();
    subscriptions.push(SHUTDOWN_TOPIC);

    json!({
        "options": options,
        "rpcmethods": [],
        "subscriptions": subscriptions,
        "dynamic": false,
    })
}

/// Merge `init` parameters into `base`.
pub fn config_from_init(params: &Value, mut base: RuntimeConfig) -> Result<RuntimeConfig, LoadError> {
    let options = params.get("options").cloned().unwrap_or(Value::Null);

    apply_overrides(&mut base, |env_name| {
        let (option, _, _) = OPTIONS.iter().find(|(_, env, _)| *env == env_name)?;
        option_string(options.get(*option)?)
    })?;

    if let Some(allow) = options.get(CORS_OPTION) {
        base.gateway.cors.allow_all =
            allow.as_bool().unwrap_or_else(|| allow.as_str() == Some("true"));
    }

    let configuration = params.get("configuration");
    let dir = configuration
        .and_then(|c| c.get("lightning-dir"))
        .and_then(Value::as_str);
    let file = configuration
        .and_then(|c| c.get("rpc-file"))
        .and_then(Value::as_str);
    if let Some(file) = file {
        base.daemon.rpc_file = match dir {
            Some(dir) => PathBuf::from(dir).join(file),
            None => PathBuf::from(file),
        };
    }

    Ok(base)
}

fn option_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// JSON-RPC framing over a byte stream pair.
pub struct PluginHost<R, W> {
    reader: R,
    writer: W,
    buffer: Vec<u8>,
}

impl<R, W> PluginHost<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader,
            writer,
            buffer: Vec::new(),
        }
    }

    /// Next message, or `None` once the daemon closed our stdin.
    pub async fn next_message(&mut self) -> Result<Option<Value>, PluginError> {
        let mut chunk = [0u8; 8192];
        loop {
            let mut values = serde_json::Deserializer::from_slice(&self.buffer).into_iter::<Value>();
            match values.next() {
                Some(Ok(value)) => {
                    let used = values.byte_offset();
                    self.buffer.drain(..used);
                    return Ok(Some(value));
                }
                Some(Err(e)) if e.is_eof() => {}
                Some(Err(e)) => return Err(PluginError::Protocol(e.to_string())),
                None => self.buffer.clear(),
            }

            let read = self.reader.read(&mut chunk).await?;
            if read == 0 {
                return Ok(None);
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    pub async fn respond(&mut self, id: Value, result: Value) -> Result<(), PluginError> {
        self.write(json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await
    }

    pub async fn respond_unknown(&mut self, id: Value, method: &str) -> Result<(), PluginError> {
        self.write(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": {"code": METHOD_NOT_FOUND, "message": format!("unknown method '{method}'")},
        }))
        .await
    }

    async fn write(&mut self, message: Value) -> Result<(), PluginError> {
        let mut bytes =
            serde_json::to_vec(&message).map_err(|e| PluginError::Protocol(e.to_string()))?;
        bytes.extend_from_slice(b"\n\n");
        self.writer.write_all(&bytes).await?;
        self.writer.flush().await?;
        Ok(())
    }
}

//! JSON-RPC 2.0 client for the daemon's unix socket.
//!
//! Interactive calls share one connection and run one at a time. Each
//! long-poll opens its own connection so a parked `waitanyinvoice` never
//! blocks them. A connection that timed out or misbehaved is dropped and
//! reopened on the next call.

use async_trait::async_trait;
use serde_json::{json, Value};
use sg_gateway::{UpstreamClient, UpstreamError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const READ_CHUNK: usize = 64 * 1024;

/// Daemon RPC client
pub struct LightningRpc {
    path: PathBuf,
    interactive: Mutex<Option<UnixStream>>,
    next_id: AtomicU64,
}

impl LightningRpc {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            interactive: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<UnixStream, UpstreamError> {
        UnixStream::connect(&self.path).await.map_err(|e| {
            UpstreamError::Transport(format!("connect {}: {}", self.path.display(), e))
        })
    }
}

#[async_trait]
impl UpstreamClient for LightningRpc {
    async fn call(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let id = self.next_id();
        let mut slot = self.interactive.lock().await;

        let mut stream = match slot.take() {
            Some(stream) => stream,
            None => self.connect().await?,
        };

        // Only a clean exchange puts the connection back. After a timeout a
        // late reply would be read as the answer to the next call.
        match tokio::time::timeout(timeout, exchange(&mut stream, id, method, params)).await {
            Ok(Ok(response)) => {
                let parsed = parse_response(id, response);
                if !matches!(parsed, Err(UpstreamError::Transport(_))) {
                    *slot = Some(stream);
                }
                parsed
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(UpstreamError::Timeout),
        }
    }

    async fn long_poll(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        let id = self.next_id();
        let mut stream = self.connect().await?;
        match tokio::time::timeout(timeout, exchange(&mut stream, id, method, params)).await {
            Ok(Ok(response)) => parse_response(id, response),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(UpstreamError::Timeout),
        }
    }
}

async fn exchange(
    stream: &mut UnixStream,
    id: u64,
    method: &str,
    params: Value,
) -> Result<Value, UpstreamError> {
    let request = json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    });
    let bytes = serde_json::to_vec(&request)
        .map_err(|e| UpstreamError::Transport(format!("encode request: {e}")))?;

    debug!(method, id, "Calling daemon");
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| UpstreamError::Transport(format!("write: {e}")))?;

    read_message(stream).await
}

/// Read until the buffer holds one complete JSON value.
pub(crate) async fn read_message<R>(reader: &mut R) -> Result<Value, UpstreamError>
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut chunk = vec![0u8; READ_CHUNK];

    loop {
        let read = reader
            .read(&mut chunk)
            .await
            .map_err(|e| UpstreamError::Transport(format!("read: {e}")))?;
        if read == 0 {
            return Err(UpstreamError::Transport("connection closed".into()));
        }
        buffer.extend_from_slice(&chunk[..read]);

        let mut values = serde_json::Deserializer::from_slice(&buffer).into_iter::<Value>();
        match values.next() {
            Some(Ok(value)) => return Ok(value),
            Some(Err(e)) if e.is_eof() => continue,
            Some(Err(e)) => return Err(UpstreamError::Transport(format!("bad response: {e}"))),
            None => continue,
        }
    }
}

fn parse_response(id: u64, mut response: Value) -> Result<Value, UpstreamError> {
    if response.get("id").and_then(Value::as_u64) != Some(id) {
        warn!(expected = id, "Daemon answered a different request");
        return Err(UpstreamError::Transport("response id mismatch".into()));
    }

    if let Some(error) = response.get("error") {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-1);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(UpstreamError::Application { code, message });
    }

    match response.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(UpstreamError::Transport("response has no result".into())),
    }
}

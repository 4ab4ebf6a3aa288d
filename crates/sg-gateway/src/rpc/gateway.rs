//! The RPC gateway: one authorized call per HTTP request.

use crate::domain::keyring::{Credential, Keyring};
use crate::domain::permissions::Denial;
use crate::middleware::metrics::{GatewayMetrics, RpcOutcome};
use crate::middleware::tracing::record_rpc_method;
use crate::ports::{UpstreamClient, UpstreamError};
use crate::rpc::engine::PermissionEngine;
use crate::rpc::extensions::Extensions;
use crate::rpc::call_bounded;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A parsed call.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub method: String,
    /// Positional array or named object. Never null.
    pub params: Value,
}

#[derive(Deserialize)]
struct RawRequest {
    method: String,
    #[serde(default)]
    params: Value,
}

/// Parse `{"method": string, "params": array|object}`.
///
/// Missing or null `params` become an empty positional list.
pub fn parse_request(raw: &[u8]) -> Result<RpcRequest, RpcError> {
    let parsed: RawRequest =
        serde_json::from_slice(raw).map_err(|e| RpcError::Malformed(e.to_string()))?;

    if parsed.method.is_empty() {
        return Err(RpcError::Malformed("empty method".into()));
    }

    let params = match parsed.params {
        Value::Null => Value::Array(Vec::new()),
        params @ (Value::Array(_) | Value::Object(_)) => params,
        _ => {
            return Err(RpcError::Malformed(
                "params must be an array or an object".into(),
            ))
        }
    };

    Ok(RpcRequest {
        method: parsed.method,
        params,
    })
}

/// Error body for daemon-rejected calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LightningError {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub message: String,
    pub code: i64,
    pub full_type: String,
}

impl LightningError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            kind: "lightning".into(),
            name: "LightningError".into(),
            message: message.into(),
            code,
            full_type: "lightning".into(),
        }
    }
}

/// Why a call produced no result.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RpcError {
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] Denial),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

impl RpcError {
    pub fn status(&self) -> StatusCode {
        match self {
            RpcError::Malformed(_) => StatusCode::BAD_REQUEST,
            RpcError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            RpcError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn outcome(&self) -> RpcOutcome {
        match self {
            RpcError::Malformed(_) => RpcOutcome::Malformed,
            RpcError::Unauthorized(_) => RpcOutcome::Denied,
            RpcError::Upstream(_) => RpcOutcome::UpstreamError,
        }
    }
}

impl IntoResponse for RpcError {
    fn into_response(self) -> Response {
        match self {
            RpcError::Upstream(UpstreamError::Application { code, message }) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(LightningError::new(code, message)),
            )
                .into_response(),
            other => other.status().into_response(),
        }
    }
}

/// Authenticates, authorizes and forwards calls to the daemon.
pub struct RpcGateway {
    keyring: Arc<Keyring>,
    engine: PermissionEngine,
    extensions: Extensions,
    upstream: Arc<dyn UpstreamClient>,
    timeout: Duration,
    metrics: Arc<GatewayMetrics>,
}

impl RpcGateway {
    pub fn new(
        keyring: Arc<Keyring>,
        upstream: Arc<dyn UpstreamClient>,
        timeout: Duration,
        metrics: Arc<GatewayMetrics>,
    ) -> Self {
        Self {
            keyring,
            engine: PermissionEngine::new(Arc::clone(&upstream), timeout),
            extensions: Extensions::new(Arc::clone(&upstream), timeout),
            upstream,
            timeout,
            metrics,
        }
    }

    /// Handle one raw request body.
    pub async fn handle(
        &self,
        raw: &[u8],
        credential: Option<&Credential>,
    ) -> Result<Value, RpcError> {
        let start = Instant::now();
        let result = self.process(raw, credential).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => self.metrics.record_rpc(RpcOutcome::Success, latency_ms),
            Err(e) => self.metrics.record_rpc(e.outcome(), latency_ms),
        }
        result
    }

    async fn process(
        &self,
        raw: &[u8],
        credential: Option<&Credential>,
    ) -> Result<Value, RpcError> {
        let request = parse_request(raw).map_err(|e| {
            debug!(error = %e, "Rejecting malformed request");
            e
        })?;
        let method = request.method.as_str();
        record_rpc_method(method);

        let permissions = self.keyring.resolve(credential).map_err(|denial| {
            warn!(method, reason = %denial, "Request not authenticated");
            denial
        })?;

        self.engine
            .authorize(permissions, method, &request.params)
            .await
            .map_err(|denial| {
                warn!(method, reason = %denial, "Request denied");
                denial
            })?;

        let result = match self.extensions.dispatch(method, &request.params).await {
            Some(result) => result,
            None => {
                call_bounded(
                    self.upstream.as_ref(),
                    method,
                    request.params,
                    self.timeout,
                )
                .await
            }
        };

        result.map_err(|e| {
            info!(method, error = %e, "Error calling RPC");
            RpcError::Upstream(e)
        })
    }
}

//! RPC forwarding: request parsing, authorization and the daemon call.

pub mod engine;
pub mod extensions;
pub mod gateway;

pub use engine::PermissionEngine;
pub use extensions::Extensions;
pub use gateway::{parse_request, LightningError, RpcError, RpcGateway, RpcRequest};

use crate::ports::{UpstreamClient, UpstreamError};
use serde_json::Value;
use std::time::Duration;

/// Call the daemon, failing with [`UpstreamError::Timeout`] once `timeout`
/// has passed whether or not the adapter honours it.
pub async fn call_bounded(
    upstream: &dyn UpstreamClient,
    method: &str,
    params: Value,
    timeout: Duration,
) -> Result<Value, UpstreamError> {
    match tokio::time::timeout(timeout, upstream.call(method, params, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(UpstreamError::Timeout),
    }
}

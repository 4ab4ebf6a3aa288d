//! Shared fixtures.

use axum::body::{Body, BodyDataStream};
use axum::http::Request;
use axum::response::Response;
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use sg_gateway::adapters::ScriptedUpstream;
use sg_gateway::{AuthMode, GatewayConfig, GatewayService, KeyEntry};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Auth required, one key `abc` that may only call `getinfo`.
pub fn config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.mode = Some(AuthMode::Required);
    config
        .auth
        .keys
        .insert("abc".into(), KeyEntry::allow(["getinfo"]));
    config.timeouts.invoice_poll = Duration::from_millis(50);
    config.timeouts.error_backoff = Duration::from_millis(10);
    config.price.enabled = false;
    config
}

/// A daemon with no invoices that answers `getinfo`.
pub fn daemon() -> ScriptedUpstream {
    ScriptedUpstream::new()
        .on("listinvoices", |_| Ok(json!({"invoices": []})))
        .on("getinfo", |_| {
            Ok(json!({"id": "02abcdef", "alias": "test-node", "blockheight": 800000}))
        })
}

/// A started gateway. Keep the service alive for as long as the router is used.
pub async fn start(
    config: GatewayConfig,
    upstream: Arc<ScriptedUpstream>,
) -> (GatewayService, Router) {
    let mut service =
        GatewayService::new(config, upstream, None, None).expect("valid test config");
    let router = service.start().await.expect("gateway starts");
    (service, router)
}

/// POST a raw body to `/rpc` with the given headers.
pub async fn post_rpc(router: &Router, headers: &[(&str, &str)], body: &str) -> Response {
    let mut request = Request::post("/rpc");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    router
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

pub async fn json_body(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

/// GET `/stream` with the given headers.
pub async fn open_stream(router: &Router, headers: &[(&str, &str)]) -> Response {
    let mut request = Request::get("/stream");
    for (name, value) in headers {
        request = request.header(*name, *value);
    }
    router
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

/// One parsed SSE event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
    pub retry: Option<String>,
}

/// Reads SSE frames off a response body.
pub struct SseReader {
    body: BodyDataStream,
    pending: String,
}

impl SseReader {
    pub fn new(response: Response) -> Self {
        Self {
            body: response.into_body().into_data_stream(),
            pending: String::new(),
        }
    }

    /// Next frame of any kind, failing the test after one second.
    pub async fn next_frame(&mut self) -> SseFrame {
        loop {
            if let Some(end) = self.pending.find("\n\n") {
                let raw: String = self.pending.drain(..end + 2).collect();
                if let Some(frame) = parse_frame(&raw) {
                    return frame;
                }
                continue;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(1), self.body.next())
                .await
                .expect("no frame within 1s")
                .expect("stream ended")
                .expect("body error");
            self.pending.push_str(&String::from_utf8_lossy(&chunk));
        }
    }

    /// Next frame carrying an event.
    pub async fn next_event(&mut self) -> SseFrame {
        loop {
            let frame = self.next_frame().await;
            if frame.event.is_some() {
                return frame;
            }
        }
    }

    /// True when nothing arrives within `wait`.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        if self.pending.contains("\n\n") {
            return false;
        }
        tokio::time::timeout(wait, self.body.next()).await.is_err()
    }
}

/// Parse one frame. Comment-only frames yield `None`.
pub fn parse_frame(raw: &str) -> Option<SseFrame> {
    let mut frame = SseFrame::default();
    let mut seen = false;
    for line in raw.lines() {
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        let (field, value) = line.split_once(':').unwrap_or((line, ""));
        let value = value.strip_prefix(' ').unwrap_or(value).to_string();
        seen = true;
        match field {
            "id" => frame.id = Some(value),
            "event" => frame.event = Some(value),
            "data" => {
                if !frame.data.is_empty() {
                    frame.data.push('\n');
                }
                frame.data.push_str(&value);
            }
            "retry" => frame.retry = Some(value),
            _ => {}
        }
    }
    seen.then_some(frame)
}

/// Poll `condition` until it holds, failing the test after one second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within 1s");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_frame() {
        let frame = parse_frame("id: 3\nevent: inv-paid\ndata: {\"a\":1}\n\n").unwrap();
        assert_eq!(frame.id.as_deref(), Some("3"));
        assert_eq!(frame.event.as_deref(), Some("inv-paid"));
        assert_eq!(frame.data, "{\"a\":1}");

        let frame = parse_frame("retry:3000\n\n").unwrap();
        assert_eq!(frame.retry.as_deref(), Some("3000"));

        assert_eq!(parse_frame(": keepalive\n\n"), None);
    }
}

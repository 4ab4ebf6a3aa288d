//! `GET /stream`: one SSE connection per broker client.
//!
//! The response opens with a `retry` hint, then replays whatever the broker
//! queued at registration, then follows live events. Each event carries its
//! sequence as the SSE `id`, so a reconnecting client can send it back as
//! `Last-Event-ID`.

use crate::broker::{BrokerHandle, ClientSubscription};
use crate::domain::event::Event;
use crate::domain::keyring::{Credential, Keyring};
use crate::domain::permissions::Denial;
use crate::middleware::metrics::GatewayMetrics;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{stream, StreamExt};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const LAST_EVENT_ID: &str = "last-event-id";
const ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");
const KEEPALIVE_TEXT: &str = "keepalive";

/// Stream timing
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    /// Comment frame interval on an idle connection
    pub keepalive: Duration,
    /// Reconnect delay advertised to clients
    pub retry: Duration,
}

/// Why a stream could not be opened.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("unauthorized: {0}")]
    Unauthorized(#[from] Denial),
    #[error("event broker unavailable")]
    Unavailable,
}

impl IntoResponse for StreamError {
    fn into_response(self) -> Response {
        match self {
            StreamError::Unauthorized(_) => StatusCode::UNAUTHORIZED.into_response(),
            StreamError::Unavailable => StatusCode::SERVICE_UNAVAILABLE.into_response(),
        }
    }
}

/// Read `Last-Event-ID`. Anything that is not a sequence number is ignored.
pub fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Opens event streams for authenticated clients.
pub struct StreamHandler {
    keyring: Arc<Keyring>,
    broker: BrokerHandle,
    metrics: Arc<GatewayMetrics>,
    settings: StreamSettings,
}

impl StreamHandler {
    pub fn new(
        keyring: Arc<Keyring>,
        broker: BrokerHandle,
        metrics: Arc<GatewayMetrics>,
        settings: StreamSettings,
    ) -> Self {
        Self {
            keyring,
            broker,
            metrics,
            settings,
        }
    }

    /// Any recognized credential may listen; method permissions do not apply.
    pub async fn open(
        &self,
        credential: Option<&Credential>,
        last_event_id: Option<u64>,
    ) -> Result<Response, StreamError> {
        if let Err(denial) = self.keyring.resolve(credential) {
            warn!(reason = %denial, "Stream connection refused");
            self.metrics.record_stream_rejected();
            return Err(denial.into());
        }

        let subscription = self
            .broker
            .subscribe(last_event_id)
            .await
            .map_err(|_| StreamError::Unavailable)?;
        self.metrics.record_stream_connect();
        info!(client = %subscription.id(), ?last_event_id, "Stream client connected");

        Ok(self.respond(subscription))
    }

    fn respond(&self, subscription: ClientSubscription) -> Response {
        let retry = SseEvent::default().retry(self.settings.retry);
        let events = stream::once(async move { retry })
            .chain(subscription.map(|event| to_sse(&event)))
            .map(Ok::<_, Infallible>);

        let sse = Sse::new(events).keep_alive(
            KeepAlive::new()
                .interval(self.settings.keepalive)
                .text(KEEPALIVE_TEXT),
        );

        (
            [
                (ACCEL_BUFFERING, HeaderValue::from_static("no")),
                (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
                (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            ],
            sse,
        )
            .into_response()
    }
}

fn to_sse(event: &Event) -> SseEvent {
    SseEvent::default()
        .id(event.sequence.to_string())
        .event(event.kind.as_str())
        .data(event.data())
}

//! Request span middleware.
//!
//! Every request runs inside an `http_request` span. The RPC handler fills in
//! `rpc.method` once the body is parsed.

use axum::{body::Body, http::Request, response::Response};
use std::task::{Context, Poll};
use std::time::Instant;
use tower::{Layer, Service};
use tracing::{debug, info_span, Instrument, Span};

/// Tracing layer that creates spans for each request
#[derive(Clone, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

impl<S> Layer<S> for TracingLayer {
    type Service = TracingService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TracingService { inner }
    }
}

/// Tracing service
#[derive(Clone)]
pub struct TracingService<S> {
    inner: S,
}

impl<S> Service<Request<Body>> for TracingService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let mut inner = self.inner.clone();

        let span = info_span!(
            "http_request",
            http.method = %req.method(),
            http.target = %req.uri().path(),
            rpc.method = tracing::field::Empty,
            http.status = tracing::field::Empty,
        );

        Box::pin(
            async move {
                let start = Instant::now();
                let result = inner.call(req).await;

                if let Ok(response) = &result {
                    let status = response.status().as_u16();
                    Span::current().record("http.status", status);
                    debug!(
                        status,
                        latency_ms = start.elapsed().as_millis() as u64,
                        "Request finished"
                    );
                }

                result
            }
            .instrument(span),
        )
    }
}

/// Attach the RPC method to the current request span.
pub fn record_rpc_method(method: &str) {
    Span::current().record("rpc.method", method);
}

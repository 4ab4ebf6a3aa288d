//! Gateway counters, surfaced by `/health`.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Gateway metrics
#[derive(Default)]
pub struct GatewayMetrics {
    // RPC counters
    pub rpc_requests: AtomicU64,
    pub rpc_success: AtomicU64,
    pub rpc_malformed: AtomicU64,
    pub rpc_denied: AtomicU64,
    pub rpc_upstream_errors: AtomicU64,

    // Stream counters
    pub stream_connections: AtomicU64,
    pub stream_rejected: AtomicU64,
    pub events_published: AtomicU64,
    pub slow_client_disconnects: AtomicU64,

    // Latency tracking
    pub total_latency_ms: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub rpc_requests: u64,
    pub rpc_success: u64,
    pub rpc_malformed: u64,
    pub rpc_denied: u64,
    pub rpc_upstream_errors: u64,
    pub stream_connections: u64,
    pub stream_rejected: u64,
    pub events_published: u64,
    pub slow_client_disconnects: u64,
    pub average_latency_ms: u64,
}

/// Outcome of one RPC request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcOutcome {
    Success,
    Malformed,
    Denied,
    UpstreamError,
}

impl GatewayMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request
    pub fn record_rpc(&self, outcome: RpcOutcome, latency_ms: u64) {
        self.rpc_requests.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            RpcOutcome::Success => &self.rpc_success,
            RpcOutcome::Malformed => &self.rpc_malformed,
            RpcOutcome::Denied => &self.rpc_denied,
            RpcOutcome::UpstreamError => &self.rpc_upstream_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_stream_connect(&self) {
        self.stream_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stream_rejected(&self) {
        self.stream_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event(&self) {
        self.events_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_slow_client(&self) {
        self.slow_client_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Get average latency in ms
    pub fn average_latency_ms(&self) -> u64 {
        let total = self.total_latency_ms.load(Ordering::Relaxed);
        let count = self.rpc_requests.load(Ordering::Relaxed);
        if count == 0 {
            0
        } else {
            total / count
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rpc_requests: self.rpc_requests.load(Ordering::Relaxed),
            rpc_success: self.rpc_success.load(Ordering::Relaxed),
            rpc_malformed: self.rpc_malformed.load(Ordering::Relaxed),
            rpc_denied: self.rpc_denied.load(Ordering::Relaxed),
            rpc_upstream_errors: self.rpc_upstream_errors.load(Ordering::Relaxed),
            stream_connections: self.stream_connections.load(Ordering::Relaxed),
            stream_rejected: self.stream_rejected.load(Ordering::Relaxed),
            events_published: self.events_published.load(Ordering::Relaxed),
            slow_client_disconnects: self.slow_client_disconnects.load(Ordering::Relaxed),
            average_latency_ms: self.average_latency_ms(),
        }
    }
}

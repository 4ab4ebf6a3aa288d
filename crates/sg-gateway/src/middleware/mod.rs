//! Middleware stack.
//!
//! Layer order: Request → Tracing → CORS → Credential → Handler. `/rpc`
//! responses are additionally gzip-compressed when the client accepts it.

pub mod auth;
pub mod cors;
pub mod metrics;
pub mod tracing;

pub use auth::{extract_credential, CredentialLayer, PresentedCredential};
pub use cors::create_cors_layer;
pub use metrics::{GatewayMetrics, MetricsSnapshot, RpcOutcome};
pub use self::tracing::{record_rpc_method, TracingLayer};

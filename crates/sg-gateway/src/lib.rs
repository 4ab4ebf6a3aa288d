//! Sparkgate gateway core: an authenticated HTTP front for a local Lightning
//! daemon's JSON-RPC interface, plus a server-sent event stream of node
//! activity.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                              SPARKGATE                               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   POST /rpc            GET /stream            GET /health            │
//! │       │                    │                                         │
//! │  ┌────┴────────────────────┴─────────────────┐                       │
//! │  │            Middleware Stack               │                       │
//! │  │   Tracing → CORS → Credential extraction  │                       │
//! │  └────┬────────────────────┬─────────────────┘                       │
//! │       │                    │                                         │
//! │  ┌────┴──────────┐   ┌─────┴──────────┐      ┌────────────────────┐  │
//! │  │  RpcGateway   │   │ StreamHandler  │◄─────┤    Event broker    │  │
//! │  │ Keyring →     │   │ retry, replay, │      │ sequence, backlog, │  │
//! │  │ Permission    │   │ live events    │      │ cached state       │  │
//! │  │ engine →      │   └────────────────┘      └─────────▲──────────┘  │
//! │  │ extensions    │                                     │             │
//! │  └────┬──────────┘        invoice poller, price poller, notifications│
//! └───────┼────────────────────────────────────────────────┼─────────────┘
//!         ▼                                                │
//!   UpstreamClient (daemon socket) ────────────────────────┘
//! ```
//!
//! # Credentials
//!
//! - An access key is matched against the keyring in constant time.
//! - A `user:password` login is turned into its access key with
//!   HMAC-SHA256 and then matched the same way.
//! - With authentication disabled every caller has full access.
//!
//! # Usage
//!
//! ```ignore
//! use sg_gateway::{GatewayConfig, GatewayService};
//!
//! let service = GatewayService::new(config, upstream, Some(rates), None)?;
//! service.run(shutdown_signal()).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod broker;
pub mod domain;
pub mod middleware;
pub mod ports;
pub mod rpc;
pub mod service;
pub mod stream;

// Re-exports for public API
pub use broker::{spawn_broker, BrokerConfig, BrokerHandle, ClientSubscription};
pub use domain::config::{AuthMode, ConfigError, GatewayConfig, KeyEntry};
pub use domain::error::GatewayError;
pub use domain::event::{kinds, Event, Notification};
pub use domain::keyring::{Credential, Keyring};
pub use domain::permissions::{Denial, PermissionSet, Profile};
pub use middleware::GatewayMetrics;
pub use ports::{NotificationSource, RateError, RateSource, UpstreamClient, UpstreamError};
pub use rpc::{LightningError, RpcError, RpcGateway};
pub use service::GatewayService;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Ports for the gateway.

pub mod outbound;

pub use outbound::{NotificationSource, RateError, RateSource, UpstreamClient, UpstreamError};

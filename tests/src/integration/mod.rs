//! Cross-module flows through the HTTP router.

pub mod e2e_gateway;
pub mod stream_fanout;

//! Adapters for the gateway ports.
//!
//! In-memory implementations used by tests and by embedders that feed the
//! gateway from their own event loop.

pub mod notifications;
pub mod scripted;

pub use notifications::{notification_channel, ChannelNotifications};
pub use scripted::{ScriptedRates, ScriptedUpstream};

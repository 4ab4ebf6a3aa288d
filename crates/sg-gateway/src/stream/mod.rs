//! Server-sent event stream for browser and dashboard clients.

pub mod handler;

pub use handler::{last_event_id, StreamError, StreamHandler, StreamSettings};

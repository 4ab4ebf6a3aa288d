//! Event broker: sequencing, fan-out and the upstream pollers.

pub mod backlog;
pub mod pollers;
pub mod registry;

pub use backlog::Backlog;
pub use pollers::{InvoicePoller, InvoicePollerConfig, NotificationPump, PollStep, PricePoller};
pub use registry::{spawn_broker, BrokerConfig, BrokerError, BrokerHandle, ClientSubscription};

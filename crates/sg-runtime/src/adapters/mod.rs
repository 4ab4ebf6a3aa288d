//! Adapters connecting the gateway ports to the outside world.

pub mod bitstamp;
pub mod lightningd;

pub use bitstamp::BitstampRates;
pub use lightningd::LightningRpc;

//! Events delivered on the stream.

use serde::Serialize;
use serde_json::Value;

/// Event kinds produced by the gateway itself. Passthrough notifications use
/// the daemon topic name as their kind.
pub mod kinds {
    /// An invoice was paid; payload is the invoice record.
    pub const INVOICE_PAID: &str = "inv-paid";
    /// BTC/USD rate; payload is the rate as a JSON string.
    pub const BTCUSD: &str = "btcusd";
}

/// A sequenced event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub kind: String,
    /// Global, strictly increasing across all kinds. Starts at 1.
    pub sequence: u64,
    pub payload: Value,
}

impl Event {
    /// Payload as it goes on the wire.
    pub fn data(&self) -> String {
        self.payload.to_string()
    }
}

/// A raw notification pushed by the daemon.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub topic: String,
    pub params: Value,
}

//! Upstream event sources feeding the broker.
//!
//! Each source runs as its own task. A failure in one never stalls another,
//! and none of them holds up interactive RPC calls: the invoice long-poll uses
//! [`UpstreamClient::long_poll`], which adapters serve on a separate channel.

use crate::broker::registry::BrokerHandle;
use crate::domain::event::kinds;
use crate::domain::error::GatewayError;
use crate::ports::{NotificationSource, RateSource, UpstreamClient, UpstreamError};
use crate::rpc::call_bounded;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

const LIST_INVOICES: &str = "listinvoices";
const WAIT_ANY_INVOICE: &str = "waitanyinvoice";

/// Invoice poller timing
#[derive(Debug, Clone, Copy)]
pub struct InvoicePollerConfig {
    /// Deadline for the initial `listinvoices`
    pub call_timeout: Duration,
    /// Deadline for each `waitanyinvoice`
    pub poll_timeout: Duration,
    /// Pause after a failed poll
    pub error_backoff: Duration,
}

/// Outcome of one long-poll round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// An invoice was paid and published.
    Delivered,
    /// Nothing happened before the deadline.
    Idle,
    /// The poll failed; the caller should back off.
    Failed,
    /// The broker is gone.
    Stopped,
}

/// Follows invoice settlement with `waitanyinvoice`.
pub struct InvoicePoller {
    upstream: Arc<dyn UpstreamClient>,
    broker: BrokerHandle,
    config: InvoicePollerConfig,
    /// Last seen `pay_index`. Only this poller writes it.
    cursor: u64,
}

impl InvoicePoller {
    /// Read the initial cursor. Failing here must stop the process: without
    /// a cursor, payments made while starting up could be skipped or repeated.
    pub async fn start(
        upstream: Arc<dyn UpstreamClient>,
        broker: BrokerHandle,
        config: InvoicePollerConfig,
    ) -> Result<Self, GatewayError> {
        let listed = call_bounded(
            upstream.as_ref(),
            LIST_INVOICES,
            json!([]),
            config.call_timeout,
        )
        .await
        .map_err(|e| GatewayError::InitialCursor(e.to_string()))?;

        let invoices = listed
            .get("invoices")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::InitialCursor("listinvoices returned no invoices".into()))?;
        let cursor = invoices
            .iter()
            .filter_map(|inv| inv.get("pay_index").and_then(Value::as_u64))
            .max()
            .unwrap_or(0);

        info!(cursor, "Invoice cursor acquired");
        Ok(Self {
            upstream,
            broker,
            config,
            cursor,
        })
    }

    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Poll until the broker shuts down.
    pub async fn run(mut self) {
        loop {
            match self.poll_once().await {
                PollStep::Delivered | PollStep::Idle => {}
                PollStep::Failed => tokio::time::sleep(self.config.error_backoff).await,
                PollStep::Stopped => break,
            }
        }
        debug!("Invoice poller stopped");
    }

    pub async fn poll_once(&mut self) -> PollStep {
        if self.broker.is_closed() {
            return PollStep::Stopped;
        }

        let result = self
            .upstream
            .long_poll(WAIT_ANY_INVOICE, json!([self.cursor]), self.config.poll_timeout)
            .await;

        let invoice = match result {
            Ok(invoice) => invoice,
            Err(UpstreamError::Timeout) => return PollStep::Idle,
            Err(e) => {
                warn!(error = %e, cursor = self.cursor, "waitanyinvoice failed, backing off");
                return PollStep::Failed;
            }
        };

        let Some(pay_index) = invoice.get("pay_index").and_then(Value::as_u64) else {
            warn!(cursor = self.cursor, "waitanyinvoice result has no pay_index");
            return PollStep::Failed;
        };
        self.cursor = self.cursor.max(pay_index);

        debug!(pay_index, "Invoice paid");
        match self.broker.publish(kinds::INVOICE_PAID, invoice) {
            Ok(()) => PollStep::Delivered,
            Err(_) => PollStep::Stopped,
        }
    }
}

/// Polls the BTC/USD rate while anyone is listening.
pub struct PricePoller {
    rates: Arc<dyn RateSource>,
    broker: BrokerHandle,
    interval: Duration,
}

impl PricePoller {
    pub fn new(rates: Arc<dyn RateSource>, broker: BrokerHandle, interval: Duration) -> Self {
        Self {
            rates,
            broker,
            interval,
        }
    }

    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if self.broker.is_closed() {
                break;
            }
            if !self.tick().await {
                break;
            }
        }
        debug!("Price poller stopped");
    }

    /// One scheduled fetch. Returns `false` once the broker is gone.
    pub async fn tick(&self) -> bool {
        if self.broker.client_count() == 0 {
            return true;
        }
        match self.rates.fetch_rate().await {
            Ok(rate) => {
                debug!(rate = %rate, "Price updated");
                self.broker
                    .publish_state(kinds::BTCUSD, Value::String(rate))
                    .is_ok()
            }
            Err(e) => {
                warn!(error = %e, "Price fetch failed");
                true
            }
        }
    }
}

/// Forwards daemon notifications as events of the same kind.
pub struct NotificationPump {
    source: Box<dyn NotificationSource>,
    broker: BrokerHandle,
    topics: HashSet<String>,
}

impl NotificationPump {
    pub fn new(
        source: Box<dyn NotificationSource>,
        broker: BrokerHandle,
        topics: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            source,
            broker,
            topics: topics.into_iter().collect(),
        }
    }

    pub async fn run(mut self) {
        while let Some(notification) = self.source.next_notification().await {
            if !self.topics.contains(&notification.topic) {
                debug!(topic = %notification.topic, "Ignoring unsubscribed notification");
                continue;
            }
            if self
                .broker
                .publish(notification.topic, notification.params)
                .is_err()
            {
                break;
            }
        }
        debug!("Notification pump stopped");
    }
}

//! Event broker task and its handles.
//!
//! A single task owns the client registry, the sequence counter, the backlog
//! and the cached state events. Everything else talks to it by message:
//!
//! ```text
//!  pollers ──Publish──►┐
//!  stream  ──Register─►│  broker task  ──try_send──► client queue ──► stream
//!  drop    ──Deregister►┘
//! ```
//!
//! Because registration and publication are handled by the same task, a
//! client never sees a half-registered state: its initial events are queued
//! before it joins the fan-out set.

use crate::broker::backlog::Backlog;
use crate::domain::event::Event;
use crate::middleware::metrics::GatewayMetrics;
use futures::Stream;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Broker errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("event broker closed")]
    Closed,
}

/// Broker sizing
#[derive(Debug, Clone, Copy)]
pub struct BrokerConfig {
    /// Per-client queue capacity
    pub client_buffer: usize,
    /// Events kept for resume
    pub backlog: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            client_buffer: 64,
            backlog: 256,
        }
    }
}

enum Command {
    Register {
        last_event_id: Option<u64>,
        reply: oneshot::Sender<(Uuid, mpsc::Receiver<Arc<Event>>)>,
    },
    Deregister {
        id: Uuid,
    },
    Publish {
        kind: String,
        payload: Value,
        state: bool,
    },
    Shutdown,
}

struct EventBroker {
    config: BrokerConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    clients: HashMap<Uuid, mpsc::Sender<Arc<Event>>>,
    client_count: Arc<AtomicUsize>,
    next_sequence: u64,
    backlog: Backlog,
    state: HashMap<String, Arc<Event>>,
    metrics: Arc<GatewayMetrics>,
}

/// Spawn the broker task.
pub fn spawn_broker(
    config: BrokerConfig,
    metrics: Arc<GatewayMetrics>,
) -> (BrokerHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let client_count = Arc::new(AtomicUsize::new(0));

    let broker = EventBroker {
        config,
        commands: rx,
        clients: HashMap::new(),
        client_count: Arc::clone(&client_count),
        next_sequence: 1,
        backlog: Backlog::new(config.backlog),
        state: HashMap::new(),
        metrics,
    };
    let task = tokio::spawn(broker.run());

    (BrokerHandle { tx, client_count }, task)
}

impl EventBroker {
    async fn run(mut self) {
        debug!("Event broker started");
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Register {
                    last_event_id,
                    reply,
                } => self.register(last_event_id, reply),
                Command::Deregister { id } => self.deregister(id),
                Command::Publish {
                    kind,
                    payload,
                    state,
                } => self.publish(kind, payload, state),
                Command::Shutdown => break,
            }
        }
        // Dropping the senders ends every client stream.
        self.clients.clear();
        self.client_count.store(0, Ordering::SeqCst);
        info!("Event broker stopped");
    }

    fn register(
        &mut self,
        last_event_id: Option<u64>,
        reply: oneshot::Sender<(Uuid, mpsc::Receiver<Arc<Event>>)>,
    ) {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.config.client_buffer);

        for event in self.initial_events(last_event_id) {
            // Capacity was reserved by initial_events.
            let _ = tx.try_send(event);
        }

        // Counted before the reply so the caller never sees itself missing.
        self.clients.insert(id, tx);
        self.client_count.store(self.clients.len(), Ordering::SeqCst);

        if reply.send((id, rx)).is_err() {
            debug!(client_id = %id, "Client left before registration completed");
            self.deregister(id);
            return;
        }
        debug!(
            client_id = %id,
            last_event_id = ?last_event_id,
            clients = self.clients.len(),
            "Client registered"
        );
    }

    /// Replayed events plus cached state, ordered by sequence and capped to
    /// the client's queue capacity (newest kept).
    fn initial_events(&self, last_event_id: Option<u64>) -> Vec<Arc<Event>> {
        let mut initial: BTreeMap<u64, Arc<Event>> = BTreeMap::new();

        // An id this broker never issued (a restart, or a forged header) is
        // treated as a fresh connection.
        let last_event_id = last_event_id.filter(|after| {
            let issued = *after < self.next_sequence;
            if !issued {
                debug!(last_event_id = after, "Ignoring unknown resume point");
            }
            issued
        });

        if let Some(after) = last_event_id {
            if let Some(oldest) = self.backlog.oldest_sequence() {
                if oldest > after.saturating_add(1) {
                    warn!(
                        last_event_id = after,
                        oldest_retained = oldest,
                        "Resume point older than backlog, events were missed"
                    );
                }
            }
            for event in self.backlog.since(after) {
                initial.insert(event.sequence, event);
            }
        }

        for event in self.state.values() {
            let seen = last_event_id.is_some_and(|after| event.sequence <= after);
            if !seen {
                initial.insert(event.sequence, Arc::clone(event));
            }
        }

        let skip = initial.len().saturating_sub(self.config.client_buffer);
        initial.into_values().skip(skip).collect()
    }

    fn deregister(&mut self, id: Uuid) {
        if self.clients.remove(&id).is_some() {
            self.client_count.store(self.clients.len(), Ordering::SeqCst);
            debug!(client_id = %id, clients = self.clients.len(), "Client deregistered");
        }
    }

    fn publish(&mut self, kind: String, payload: Value, state: bool) {
        let event = Arc::new(Event {
            kind,
            sequence: self.next_sequence,
            payload,
        });
        self.next_sequence += 1;
        self.metrics.record_event();

        self.backlog.push(Arc::clone(&event));
        if state {
            self.state.insert(event.kind.clone(), Arc::clone(&event));
        }

        let metrics = &self.metrics;
        self.clients.retain(|id, tx| match tx.try_send(Arc::clone(&event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(client_id = %id, "Client queue full, disconnecting");
                metrics.record_slow_client();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        self.client_count.store(self.clients.len(), Ordering::SeqCst);

        debug!(
            kind = %event.kind,
            sequence = event.sequence,
            clients = self.clients.len(),
            "Event published"
        );
    }
}

/// Cloneable handle to the broker task.
#[derive(Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<Command>,
    client_count: Arc<AtomicUsize>,
}

impl BrokerHandle {
    /// Register a client. It first receives events after `last_event_id`
    /// still in the backlog, then the cached state events, then live events.
    pub async fn subscribe(
        &self,
        last_event_id: Option<u64>,
    ) -> Result<ClientSubscription, BrokerError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Register {
                last_event_id,
                reply,
            })
            .map_err(|_| BrokerError::Closed)?;
        let (id, rx) = response.await.map_err(|_| BrokerError::Closed)?;

        Ok(ClientSubscription {
            id,
            rx,
            broker: self.tx.clone(),
        })
    }

    /// Publish a one-off event.
    pub fn publish(&self, kind: impl Into<String>, payload: Value) -> Result<(), BrokerError> {
        self.send_publish(kind.into(), payload, false)
    }

    /// Publish an event and keep it as the current value of `kind` for
    /// clients that connect later.
    pub fn publish_state(
        &self,
        kind: impl Into<String>,
        payload: Value,
    ) -> Result<(), BrokerError> {
        self.send_publish(kind.into(), payload, true)
    }

    fn send_publish(&self, kind: String, payload: Value, state: bool) -> Result<(), BrokerError> {
        self.tx
            .send(Command::Publish {
                kind,
                payload,
                state,
            })
            .map_err(|_| BrokerError::Closed)
    }

    /// Live clients, as last updated by the broker task.
    pub fn client_count(&self) -> usize {
        self.client_count.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Stop the broker. Every client stream ends.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Command::Shutdown);
    }
}

/// One live stream connection.
///
/// Dropping it deregisters the client; the broker ignores repeats.
pub struct ClientSubscription {
    id: Uuid,
    rx: mpsc::Receiver<Arc<Event>>,
    broker: mpsc::UnboundedSender<Command>,
}

impl ClientSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the broker dropped this client.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.rx.recv().await
    }
}

impl Stream for ClientSubscription {
    type Item = Arc<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for ClientSubscription {
    fn drop(&mut self) {
        let _ = self.broker.send(Command::Deregister { id: self.id });
    }
}

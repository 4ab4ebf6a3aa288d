//! Scripted in-memory daemon and rate source.

use crate::ports::{RateError, RateSource, UpstreamClient, UpstreamError};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

type Handler = Box<dyn Fn(&Value) -> Result<Value, UpstreamError> + Send + Sync>;

/// Daemon double answering from per-method handlers.
///
/// Every call, interactive or long-poll, is recorded. Long-polls are answered
/// from a queue filled with [`ScriptedUpstream::push_long_poll`] and time out
/// when it stays empty.
pub struct ScriptedUpstream {
    handlers: HashMap<String, Handler>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, Value)>>,
    long_poll_tx: mpsc::UnboundedSender<Result<Value, UpstreamError>>,
    long_poll_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<Value, UpstreamError>>>,
}

impl Default for ScriptedUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        let (long_poll_tx, long_poll_rx) = mpsc::unbounded_channel();
        Self {
            handlers: HashMap::new(),
            delay: None,
            calls: Mutex::new(Vec::new()),
            long_poll_tx,
            long_poll_rx: tokio::sync::Mutex::new(long_poll_rx),
        }
    }

    /// Answer `method` with `handler`.
    pub fn on<F>(mut self, method: &str, handler: F) -> Self
    where
        F: Fn(&Value) -> Result<Value, UpstreamError> + Send + Sync + 'static,
    {
        self.handlers.insert(method.to_string(), Box::new(handler));
        self
    }

    /// Wait this long before answering interactive calls.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue the result of the next long-poll.
    pub fn push_long_poll(&self, result: Result<Value, UpstreamError>) {
        // The receiver lives as long as self.
        let _ = self.long_poll_tx.send(result);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Parameters of every call made to `method`, in order.
    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    fn record(&self, method: &str, params: &Value) {
        self.calls.lock().push((method.to_string(), params.clone()));
    }
}

#[async_trait]
impl UpstreamClient for ScriptedUpstream {
    async fn call(
        &self,
        method: &str,
        params: Value,
        _timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        self.record(method, &params);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.handlers.get(method) {
            Some(handler) => handler(&params),
            None => Err(UpstreamError::application(
                -32601,
                format!("Unknown command '{}'", method),
            )),
        }
    }

    async fn long_poll(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, UpstreamError> {
        self.record(method, &params);
        let mut rx = self.long_poll_rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(UpstreamError::Transport("scripted upstream closed".into())),
            Err(_) => Err(UpstreamError::Timeout),
        }
    }
}

/// Rate source answering from a queue.
#[derive(Default)]
pub struct ScriptedRates {
    queue: Mutex<VecDeque<Result<String, RateError>>>,
    fetches: AtomicUsize,
}

impl ScriptedRates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, result: Result<String, RateError>) {
        self.queue.lock().push_back(result);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RateSource for ScriptedRates {
    async fn fetch_rate(&self) -> Result<String, RateError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(RateError("no rate scripted".into())))
    }
}

//! Gateway service: wires the keyring, RPC gateway, broker and pollers
//! behind one HTTP router.

use crate::broker::{
    spawn_broker, BrokerConfig, BrokerHandle, InvoicePoller, InvoicePollerConfig,
    NotificationPump, PricePoller,
};
use crate::domain::config::{AuthMode, GatewayConfig};
use crate::domain::error::GatewayError;
use crate::domain::keyring::Keyring;
use crate::middleware::{
    create_cors_layer, CredentialLayer, GatewayMetrics, PresentedCredential, TracingLayer,
};
use crate::ports::{NotificationSource, RateSource, UpstreamClient};
use crate::rpc::{RpcError, RpcGateway};
use crate::stream::{last_event_id, StreamError, StreamHandler, StreamSettings};
use crate::VERSION;
use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tower_http::compression::CompressionLayer;
use tracing::{error, info, warn};

/// Gateway service state
pub struct GatewayService {
    config: GatewayConfig,
    keyring: Arc<Keyring>,
    upstream: Arc<dyn UpstreamClient>,
    rates: Option<Arc<dyn RateSource>>,
    notifications: Option<Box<dyn NotificationSource>>,
    metrics: Arc<GatewayMetrics>,
    running: Option<Running>,
}

struct Running {
    broker: BrokerHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl GatewayService {
    /// Validate the configuration and build the keyring.
    ///
    /// `rates` and `notifications` are optional sources; without them the
    /// stream carries invoice events only.
    pub fn new(
        config: GatewayConfig,
        upstream: Arc<dyn UpstreamClient>,
        rates: Option<Arc<dyn RateSource>>,
        notifications: Option<Box<dyn NotificationSource>>,
    ) -> Result<Self, GatewayError> {
        config.validate()?;
        let keyring = Arc::new(Keyring::from_config(&config.auth)?);

        if keyring.mode() == AuthMode::Disabled {
            warn!("!!! Authentication is DISABLED: every caller has full access to the node !!!");
        } else {
            for summary in keyring.summaries() {
                info!(key = %summary.fingerprint, permissions = %summary.permissions, "Access key loaded");
            }
        }

        Ok(Self {
            config,
            keyring,
            upstream,
            rates,
            notifications,
            metrics: Arc::new(GatewayMetrics::new()),
            running: None,
        })
    }

    /// Start the broker and event sources, then return the router.
    ///
    /// Fails if the initial invoice cursor cannot be read.
    pub async fn start(&mut self) -> Result<Router, GatewayError> {
        if self.running.is_some() {
            return Err(GatewayError::AlreadyStarted);
        }

        let (broker, broker_task) = spawn_broker(
            BrokerConfig {
                client_buffer: self.config.stream.client_buffer,
                backlog: self.config.stream.backlog,
            },
            Arc::clone(&self.metrics),
        );
        let mut tasks = vec![broker_task];

        let invoices = InvoicePoller::start(
            Arc::clone(&self.upstream),
            broker.clone(),
            InvoicePollerConfig {
                call_timeout: self.config.timeouts.rpc,
                poll_timeout: self.config.timeouts.invoice_poll,
                error_backoff: self.config.timeouts.error_backoff,
            },
        )
        .await;
        let invoices = match invoices {
            Ok(poller) => poller,
            Err(e) => {
                broker.shutdown();
                return Err(e);
            }
        };
        tasks.push(tokio::spawn(invoices.run()));

        if self.config.price.enabled {
            if let Some(rates) = &self.rates {
                let poller =
                    PricePoller::new(Arc::clone(rates), broker.clone(), self.config.price.interval);
                tasks.push(tokio::spawn(poller.run()));
            }
        }

        if let Some(source) = self.notifications.take() {
            let pump =
                NotificationPump::new(source, broker.clone(), self.config.notifications.topics.clone());
            tasks.push(tokio::spawn(pump.run()));
        }

        info!(tasks = tasks.len(), "Gateway started");
        let router = self.build_router(broker.clone());
        self.running = Some(Running { broker, tasks });
        Ok(router)
    }

    /// Start, bind and serve until `shutdown` resolves.
    pub async fn run<F>(mut self, shutdown: F) -> Result<(), GatewayError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.start().await?;
        let addr = self.config.http_addr();
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| GatewayError::Bind(format!("{addr}: {e}")))?;
        info!(addr = %addr, "HTTP server listening");

        // Streams never end on their own, so close them before axum waits on
        // open connections.
        let broker = self.broker().ok_or(GatewayError::BrokerClosed)?;
        let signal = async move {
            shutdown.await;
            info!("Received shutdown signal");
            broker.shutdown();
        };

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await;
        self.stop();

        served.map_err(|e| {
            error!(error = %e, "HTTP server error");
            GatewayError::Internal(e.to_string())
        })?;
        info!("Gateway stopped");
        Ok(())
    }

    /// Close every stream and stop the event sources.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.broker.shutdown();
            // The broker task exits by itself once it sees Shutdown.
            for task in running.tasks.iter().skip(1) {
                task.abort();
            }
        }
    }

    pub fn metrics(&self) -> Arc<GatewayMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn keyring(&self) -> Arc<Keyring> {
        Arc::clone(&self.keyring)
    }

    /// Broker handle, once started.
    pub fn broker(&self) -> Option<BrokerHandle> {
        self.running.as_ref().map(|r| r.broker.clone())
    }

    fn build_router(&self, broker: BrokerHandle) -> Router {
        let state = AppState {
            rpc: Arc::new(RpcGateway::new(
                Arc::clone(&self.keyring),
                Arc::clone(&self.upstream),
                self.config.timeouts.rpc,
                Arc::clone(&self.metrics),
            )),
            stream: Arc::new(StreamHandler::new(
                Arc::clone(&self.keyring),
                broker.clone(),
                Arc::clone(&self.metrics),
                StreamSettings {
                    keepalive: self.config.stream.keepalive,
                    retry: self.config.stream.retry,
                },
            )),
            broker,
            metrics: Arc::clone(&self.metrics),
        };

        let router = Router::new()
            .route("/rpc", post(handle_rpc).layer(CompressionLayer::new()))
            .route("/stream", get(handle_stream))
            .route("/health", get(health_check))
            .layer(CredentialLayer::new());

        let router = match create_cors_layer(&self.config.cors) {
            Some(cors) => router.layer(cors),
            None => router,
        };

        router.layer(TracingLayer::new()).with_state(state)
    }
}

impl Drop for GatewayService {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    rpc: Arc<RpcGateway>,
    stream: Arc<StreamHandler>,
    broker: BrokerHandle,
    metrics: Arc<GatewayMetrics>,
}

async fn handle_rpc(
    State(state): State<AppState>,
    Extension(presented): Extension<PresentedCredential>,
    body: Bytes,
) -> Result<Json<Value>, RpcError> {
    state.rpc.handle(&body, presented.credential()).await.map(Json)
}

async fn handle_stream(
    State(state): State<AppState>,
    Extension(presented): Extension<PresentedCredential>,
    headers: HeaderMap,
) -> Result<Response, StreamError> {
    state
        .stream
        .open(presented.credential(), last_event_id(&headers))
        .await
}

/// Health check endpoint
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "sparkgate",
        "version": VERSION,
        "clients": state.broker.client_count(),
        "metrics": state.metrics.snapshot(),
    }))
}

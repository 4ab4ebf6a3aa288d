//! # Sparkgate Runtime
//!
//! Wiring for the `sparkgate` executable.
//!
//! ## Modes
//!
//! - **Standalone**: reads a TOML file plus `SG_*` overrides and talks to the
//!   daemon over its unix socket. No daemon notifications are forwarded.
//! - **Plugin**: launched by the daemon, configured through plugin options,
//!   and fed the daemon's notifications over stdin.
//!
//! ## Startup Sequence
//!
//! 1. Load configuration and validate it (an auth mode must be chosen)
//! 2. Build the keyring and log key summaries
//! 3. Call `getinfo` on the daemon until it answers
//! 4. Acquire the invoice cursor and start the event sources
//! 5. Serve HTTP until Ctrl-C or the daemon's `shutdown`

pub mod adapters;
pub mod config;
pub mod plugin;
pub mod startup;

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use sg_gateway::adapters::notification_channel;
use sg_gateway::{
    GatewayError, GatewayService, NotificationSource, RateSource, UpstreamClient,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::adapters::{BitstampRates, LightningRpc};
use crate::config::RuntimeConfig;
use crate::plugin::{config_from_init, manifest, Inbound, PluginHost};

/// Notifications held while the broker catches up.
const NOTIFICATION_BUFFER: usize = 256;

/// Validate the configuration and assemble the gateway.
pub fn build_service(
    config: &RuntimeConfig,
    upstream: Arc<dyn UpstreamClient>,
    notifications: Option<Box<dyn NotificationSource>>,
) -> Result<GatewayService, GatewayError> {
    let rates: Option<Arc<dyn RateSource>> = if config.gateway.price.enabled {
        match BitstampRates::new() {
            Ok(rates) => Some(Arc::new(rates)),
            Err(e) => {
                warn!(error = %e, "Price source unavailable, btcusd events disabled");
                None
            }
        }
    } else {
        None
    };

    let service = GatewayService::new(config.gateway.clone(), upstream, rates, notifications)?;
    startup::log_login(service.keyring().login_tokens());
    Ok(service)
}

/// Wait for the daemon, then serve until `shutdown` resolves.
pub async fn serve<F>(
    service: GatewayService,
    upstream: Arc<dyn UpstreamClient>,
    config: RuntimeConfig,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    startup::wait_for_daemon(
        upstream.as_ref(),
        config.gateway.timeouts.rpc,
        config.daemon.connect_backoff,
    )
    .await;

    service.run(shutdown).await.context("gateway stopped with an error")
}

/// Run next to the daemon, stopping on Ctrl-C.
pub async fn run_standalone(config: RuntimeConfig) -> Result<()> {
    info!(rpc_file = %config.daemon.rpc_file.display(), "Running standalone");
    let upstream: Arc<dyn UpstreamClient> = Arc::new(LightningRpc::new(&config.daemon.rpc_file));
    let service = build_service(&config, Arc::clone(&upstream), None)
        .context("invalid configuration")?;

    serve(service, upstream, config, async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    })
    .await
}

/// Run as a daemon plugin over stdin/stdout.
pub async fn run_plugin(base: RuntimeConfig) -> Result<()> {
    let mut host = PluginHost::new(tokio::io::stdin(), tokio::io::stdout());
    drive_plugin(&mut host, base, |config| {
        Arc::new(LightningRpc::new(&config.daemon.rpc_file)) as Arc<dyn UpstreamClient>
    })
    .await
}

/// Serve the plugin protocol on `host` until the daemon says `shutdown`,
/// closes the pipe, or the gateway fails.
pub async fn drive_plugin<R, W, C>(
    host: &mut PluginHost<R, W>,
    base: RuntimeConfig,
    connect: C,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    C: Fn(&RuntimeConfig) -> Arc<dyn UpstreamClient>,
{
    let topics = base.gateway.notifications.topics.clone();
    let (notify_tx, notify_rx) = notification_channel(NOTIFICATION_BUFFER);
    let mut notify_rx = Some(notify_rx);
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let mut stop_rx = Some(stop_rx);
    let mut gateway: Option<JoinHandle<Result<()>>> = None;

    loop {
        let message = tokio::select! {
            message = host.next_message() => match message? {
                Some(message) => message,
                None => break,
            },
            finished = gateway_exit(&mut gateway) => {
                finished?;
                anyhow::bail!("gateway stopped before the daemon shut down");
            }
        };

        let inbound = match Inbound::classify(message) {
            Ok(inbound) => inbound,
            Err(e) => {
                warn!(error = %e, "Ignoring malformed plugin message");
                continue;
            }
        };

        match inbound {
            Inbound::GetManifest { id } => host.respond(id, manifest(&topics)).await?,
            Inbound::Init { id, params } => {
                let prepared = config_from_init(&params, base.clone())
                    .map_err(anyhow::Error::from)
                    .and_then(|config| {
                        let upstream = connect(&config);
                        let notifications = notify_rx
                            .take()
                            .map(|rx| Box::new(rx) as Box<dyn NotificationSource>);
                        let service = build_service(&config, Arc::clone(&upstream), notifications)?;
                        Ok((config, upstream, service))
                    });

                match prepared {
                    Ok((config, upstream, service)) => {
                        host.respond(id, json!({})).await?;
                        let stop = stop_rx.take();
                        gateway = Some(tokio::spawn(serve(service, upstream, config, async move {
                            if let Some(stop) = stop {
                                let _ = stop.await;
                            }
                        })));
                    }
                    Err(e) => {
                        error!(error = %e, "Plugin configuration rejected");
                        host.respond(id, json!({ "disable": e.to_string() })).await?;
                        return Ok(());
                    }
                }
            }
            Inbound::Notification(notification) => {
                if notify_tx.try_send(notification).is_err() {
                    warn!("Notification queue full, dropping notification");
                }
            }
            Inbound::Shutdown => break,
            Inbound::Unknown { id: Some(id), method } => host.respond_unknown(id, &method).await?,
            Inbound::Unknown { id: None, .. } => {}
        }
    }

    info!("Plugin shutting down");
    let _ = stop_tx.send(());
    if let Some(task) = gateway {
        task.await.context("gateway task panicked")??;
    }
    Ok(())
}

/// Resolves once the gateway task ends. Never resolves before it is started.
async fn gateway_exit(gateway: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    let Some(task) = gateway.as_mut() else {
        return std::future::pending().await;
    };
    let finished = task.await;
    *gateway = None;
    finished.context("gateway task panicked")?
}

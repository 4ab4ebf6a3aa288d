//! # Sparkgate
//!
//! HTTP gateway for a local Lightning daemon.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use sg_gateway::{AuthMode, VERSION};
use sg_runtime::config::{apply_env, load_file, RuntimeConfig};
use sg_runtime::plugin::PLUGIN_ENV;
use sg_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

/// Sparkgate: authenticated HTTP access to a Lightning daemon
#[derive(Parser, Debug)]
#[command(name = "sparkgate", version)]
#[command(about = "HTTP JSON-RPC gateway and event stream for a Lightning daemon")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(long)]
    host: Option<IpAddr>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Daemon JSON-RPC socket
    #[arg(long)]
    rpc_file: Option<PathBuf>,

    /// "required" or "disabled"
    #[arg(long)]
    auth: Option<AuthMode>,

    /// Allow cross-origin requests from any origin
    #[arg(long)]
    allow_cors: bool,

    /// Speak the daemon plugin protocol on stdin/stdout
    #[arg(long)]
    plugin: bool,

    /// Emit JSON logs
    #[arg(long)]
    json_logs: bool,
}

impl Args {
    fn apply(&self, config: &mut RuntimeConfig) {
        if let Some(host) = self.host {
            config.gateway.http.host = host;
        }
        if let Some(port) = self.port {
            config.gateway.http.port = port;
        }
        if let Some(rpc_file) = &self.rpc_file {
            config.daemon.rpc_file = rpc_file.clone();
        }
        if let Some(mode) = self.auth {
            config.gateway.auth.mode = Some(mode);
        }
        if self.allow_cors {
            config.gateway.cors.allow_all = true;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let plugin_mode = args.plugin || std::env::var_os(PLUGIN_ENV).is_some();

    // stdout belongs to the plugin protocol in plugin mode.
    let mut telemetry = TelemetryConfig::from_env();
    telemetry.json_logs |= args.json_logs;
    if plugin_mode {
        telemetry = telemetry.with_stderr();
    }
    init_telemetry(&telemetry)?;

    let mut config = load_file(args.config.as_deref()).context("loading configuration")?;
    apply_env(&mut config).context("reading SG_* environment")?;
    args.apply(&mut config);

    info!(version = VERSION, plugin = plugin_mode, "Starting sparkgate");

    if plugin_mode {
        sg_runtime::run_plugin(config).await
    } else {
        sg_runtime::run_standalone(config).await
    }
}

//! Global `tracing` subscriber setup.

use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogOutput;
use crate::{TelemetryConfig, TelemetryError};

/// Parse the configured filter directive.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level).map_err(|e| TelemetryError::Filter(e.to_string()))
}

fn writer(output: LogOutput) -> BoxMakeWriter {
    match output {
        LogOutput::Stdout => BoxMakeWriter::new(std::io::stdout),
        LogOutput::Stderr => BoxMakeWriter::new(std::io::stderr),
    }
}

/// Install the subscriber. Fails if one is already installed.
pub fn init_subscriber(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = build_filter(config)?;

    let fmt_layer = if config.json_logs {
        // JSON output for containers/production
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_writer(writer(config.output))
            .boxed()
    } else {
        // Pretty output for development
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_ansi(config.output == LogOutput::Stdout)
            .with_writer(writer(config.output))
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json = config.json_logs,
        "Logging initialized"
    );
    Ok(())
}

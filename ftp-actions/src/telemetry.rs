// Telemetry: structured JSON logging and Prometheus metrics for transfer actions

use anyhow::Result;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

pub const FILES_TRANSFERRED_TOTAL: &str = "ftp_files_transferred_total";
pub const BYTES_TRANSFERRED_TOTAL: &str = "ftp_bytes_transferred_total";
pub const TRANSFER_FAILURES_TOTAL: &str = "ftp_transfer_failures_total";
pub const ACTION_DURATION_SECONDS: &str = "ftp_action_duration_seconds";

/// Initialize structured logging with JSON formatting
///
/// `RUST_LOG` takes precedence over the configured level.
#[tracing::instrument(skip_all)]
pub fn init_logging(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .map_err(|e| anyhow::anyhow!("Failed to create env filter: {}", e))?;

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_target(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(json_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize tracing subscriber: {}", e))?;

    tracing::info!(log_level = log_level, "Structured logging initialized");
    Ok(())
}

/// Install the Prometheus exporter and describe the transfer metrics
#[tracing::instrument(skip_all)]
pub fn init_metrics(metrics_port: u16) -> Result<()> {
    let addr: SocketAddr = format!("0.0.0.0:{}", metrics_port)
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid metrics port: {}", e))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    describe_counter!(FILES_TRANSFERRED_TOTAL, "Files copied, extracted or uploaded");
    describe_counter!(BYTES_TRANSFERRED_TOTAL, "Bytes written to the destination");
    describe_counter!(
        TRANSFER_FAILURES_TOTAL,
        "Per-file transfer or delete failures"
    );
    describe_histogram!(
        ACTION_DURATION_SECONDS,
        "Duration of action runs in seconds"
    );

    tracing::info!(
        metrics_port = metrics_port,
        metrics_endpoint = format!("http://0.0.0.0:{}/metrics", metrics_port),
        "Prometheus metrics exporter initialized"
    );
    Ok(())
}

#[inline]
pub fn record_file_transferred(action: &'static str, protocol: &'static str, bytes: u64) {
    counter!(FILES_TRANSFERRED_TOTAL, "action" => action, "protocol" => protocol).increment(1);
    counter!(BYTES_TRANSFERRED_TOTAL, "action" => action, "protocol" => protocol).increment(bytes);
}

#[inline]
pub fn record_transfer_failure(action: &'static str, protocol: &'static str) {
    counter!(TRANSFER_FAILURES_TOTAL, "action" => action, "protocol" => protocol).increment(1);
}

#[inline]
pub fn record_action_duration(action: &'static str, duration_seconds: f64) {
    histogram!(ACTION_DURATION_SECONDS, "action" => action).record(duration_seconds);
}

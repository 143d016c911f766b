use crate::config::{LogFormat, TelemetryConfig};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Installs the global subscriber and, when enabled, the Prometheus exporter.
/// Fails if a global subscriber is already set.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;

    let fmt_layer = match config.log_format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .boxed(),
        LogFormat::Pretty => fmt::layer().compact().with_target(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;

    if config.metrics_enabled {
        let addr: SocketAddr = ([0, 0, 0, 0], config.metrics_port).into();
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .add_global_label("service", "extractor")
            .install()?;

        describe_metrics();
        tracing::info!(
            port = config.metrics_port,
            "Metrics endpoint started at http://0.0.0.0:{}/metrics",
            config.metrics_port
        );
    }

    Ok(())
}

fn describe_metrics() {
    describe_counter!("extractor_http_retries", "Retried API requests (429 and 5xx)");
    describe_counter!("extractor_tokens_issued", "Access tokens obtained from the token endpoint");
    describe_counter!("extractor_reauthentications", "Token refreshes triggered by a 401");
    describe_counter!("extractor_pages_fetched", "Non-empty query pages received");
    describe_counter!("extractor_records_skipped", "Records dropped for lacking an Id");
    describe_counter!("extractor_rows_extracted", "Rows produced per entity");
    describe_counter!("extractor_rows_upserted", "Rows submitted to the landing tables");
    describe_histogram!(
        "extractor_window_duration_ms",
        Unit::Milliseconds,
        "Wall time to drain and write one window"
    );
}

pub fn shutdown() {
    tracing::debug!("Shutting down telemetry");
}

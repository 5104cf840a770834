//! Tracing and metrics initialisation.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{ClientOptions, LogFormat};

/// Builds the filter from `--log-level` / `RUST_LOG`, falling back to `info`
/// when unset or unparsable.
pub fn env_filter(log_level: Option<&str>) -> EnvFilter {
    log_level
        .and_then(|directive| EnvFilter::try_new(directive).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

/// Installs the global tracing subscriber.
pub fn init_tracing(options: &ClientOptions) {
    let json = options.log_format == LogFormat::Json;
    tracing_subscriber::registry()
        .with(env_filter(options.log_level.as_deref()))
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Installs the global Prometheus recorder.
pub fn install_metrics() -> Result<PrometheusHandle, BuildError> {
    PrometheusBuilder::new().install_recorder()
}

//! Telemetry initialization: tracing subscriber and Prometheus recorder.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
pub fn init_tracing(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("amphora_registry={default_level},tower_http={default_level},sqlx=warn").into()
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Install the Prometheus metrics recorder and return its render handle.
pub fn init_metrics() -> Option<PrometheusHandle> {
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!("Failed to install Prometheus recorder: {e}");
            None
        }
    }
}

/// Metric names emitted across the service, kept in one place so the
/// exposition stays greppable.
pub mod names {
    pub const PUBLISH_TOTAL: &str = "amphora_publish_total";
    pub const IMPORT_ENTRIES_TOTAL: &str = "amphora_import_entries_total";
    pub const IMPORT_FAILURES_TOTAL: &str = "amphora_import_failures_total";
    pub const RECONCILE_TOTAL: &str = "amphora_reconcile_total";
    pub const RECONCILE_FAILURES_TOTAL: &str = "amphora_reconcile_failures_total";
}

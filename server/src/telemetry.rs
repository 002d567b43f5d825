//! Tracing and metrics setup for the binaries.

use crate::bootstrap::BootstrapError;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,branchline=debug,sqlx=warn";

/// Install the global `fmt` subscriber, filtered by `RUST_LOG` or [`DEFAULT_LOG_FILTER`].
///
/// # Errors
///
/// Returns [`BootstrapError::Telemetry`] if a subscriber is already installed.
pub fn init_tracing() -> Result<(), BootstrapError> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .map_err(|e| BootstrapError::Telemetry(e.to_string()))
}

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns [`BootstrapError::Telemetry`] if the exporter cannot bind or a recorder is
/// already installed.
pub fn install_metrics(addr: SocketAddr) -> Result<(), BootstrapError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| BootstrapError::Telemetry(format!("Failed to install Prometheus exporter: {e}")))?;
    tracing::info!(%addr, "Prometheus metrics available at http://{addr}/metrics");
    Ok(())
}

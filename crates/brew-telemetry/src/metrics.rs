//! Prometheus metrics recorder and metric name constants.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::TelemetryError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle, TelemetryError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket disconnections total (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// WebSocket connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Live kettles (gauge).
pub const KETTLES_ACTIVE: &str = "kettles_active";
/// Commands processed by kettle loops (counter, labels: command).
pub const KETTLE_COMMANDS_TOTAL: &str = "kettle_commands_total";
/// Messages dropped because a drinker mailbox was full or closed (counter, labels: kind).
pub const MAILBOX_DROPS_TOTAL: &str = "mailbox_drops_total";
/// Drink requests delivered to a maker (counter).
pub const DRINK_REQUESTS_FORWARDED_TOTAL: &str = "drink_requests_forwarded_total";

// Metrics exporter
// Serves the skiff_mesh metrics in Prometheus text format

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Install the Prometheus recorder and its scrape endpoint
/// Should be called once at application startup, inside the runtime
pub fn init_metrics(listen: SocketAddr) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(listen)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    skiff_mesh::metrics::describe_metrics();
    info!(%listen, "Prometheus metrics exporter listening");
    Ok(())
}

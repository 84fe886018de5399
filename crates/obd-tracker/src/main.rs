//! OBD Tracker - Main Entry Point

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use obd_protocol::mock::{MockAdapter, MockConnector};
use obd_protocol::{Connector, SerialConnector};
use obd_tracker::{init_logging, ObdSession, ResultAggregator, TrackerConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args().nth(1).map(PathBuf::from);
    let config = TrackerConfig::load(path.as_deref()).context("failed to load configuration")?;
    init_logging(&config.logging)?;

    info!("=== OBD Tracker v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = config.metrics_listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("failed to start metrics exporter")?;
        info!("Serving metrics on {}", addr);
    }

    let connector: Arc<dyn Connector> = if config.is_mock() {
        info!("Using simulated ELM327 adapter");
        Arc::new(MockConnector::new(MockAdapter::new()))
    } else {
        Arc::new(SerialConnector::new(config.baud_rate))
    };

    let device = config.device.clone();
    let report_every = Duration::from_millis(config.report_interval_ms.max(100));
    let session = ObdSession::new(config, connector)?;
    let aggregator = ResultAggregator::new();
    let listener = aggregator.attach(session.bus());

    session
        .connect(&device)
        .await
        .with_context(|| format!("failed to connect to {}", device))?;
    session.start_producer()?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut report = tokio::time::interval(report_every);

    loop {
        tokio::select! {
            res = &mut shutdown => {
                res.context("failed to listen for Ctrl-C")?;
                info!("Shutdown requested");
                break;
            }
            _ = report.tick() => {
                let table = aggregator.snapshot();
                info!(
                    readings = table.len(),
                    connection = ?session.connection_state(),
                    "{}",
                    serde_json::to_string(&table)?
                );
            }
        }
    }

    session.disconnect().await;
    listener.abort();
    Ok(())
}

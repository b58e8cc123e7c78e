use std::net::SocketAddr;

use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static PROM_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Installs the Prometheus recorder and serves `/metrics` on `bind_addr`.
pub fn init(bind_addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = bind_addr.parse()?;
    let handle = PrometheusBuilder::new().install_recorder()?;

    // Only the first call installs a handle.
    let _ = PROM_HANDLE.set(handle);
    describe();

    tokio::spawn(async move {
        let app = Router::new().route("/metrics", get(metrics_handler));

        match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => {
                tracing::info!(%addr, "metrics endpoint listening");
                if let Err(e) = axum::serve(listener, app.into_make_service()).await {
                    tracing::error!(error = %e, "metrics server error");
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to bind metrics listener");
            }
        }
    });

    Ok(())
}

fn describe() {
    describe_counter!("snapshot_fetch_total", "Snapshot fetch attempts");
    describe_counter!("snapshot_fetch_failed_total", "Snapshot fetches that failed");
    describe_counter!("snapshot_rejected_empty_total", "Snapshots dropped for carrying no sites");
    describe_counter!(
        "snapshot_replay_parse_errors_total",
        "Recorded snapshot lines that could not be parsed during replay"
    );
    describe_counter!("reconcile_cycles_total", "Snapshots reconciled into the working set");
    describe_counter!(
        "reconcile_documents_written_total",
        "Documents persisted, by collection"
    );
    describe_counter!("reconcile_anomalies_total", "Anomalies reported, by kind");
    describe_histogram!(
        "reconcile_duration_seconds",
        Unit::Seconds,
        "Wall time spent reconciling one snapshot"
    );
    describe_counter!("working_set_evicted_total", "Entities swept from the working set");
}

async fn metrics_handler() -> String {
    PROM_HANDLE.get().map(|h| h.render()).unwrap_or_default()
}

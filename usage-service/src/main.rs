use anyhow::Result;
use std::sync::Arc;
use usage_core::timezone::FixedZoneResolver;
use usage_service::{
    config::AppConfig,
    metrics_server,
    observability,
    pipeline::Pipeline,
    sinks::ReconcileSink,
    sources::HttpSnapshotSource,
    store,
    transform,
    NetworkReconciler,
    Snapshot,
    WorkingSet,
};

#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    // Load configuration
    let cfg = AppConfig::load()?;

    // Start metrics server if configured
    if let Some(metrics_cfg) = &cfg.metrics {
        metrics_server::init(&metrics_cfg.bind_addr)?;
    }

    let store = store::connect(&cfg.store).await?;
    let resolver = FixedZoneResolver::new(cfg.timezone.default.clone());
    let reconciler = NetworkReconciler::new(store, resolver, cfg.working_set.retention_cycles);
    let sink = ReconcileSink::new(WorkingSet::shared(), reconciler);

    let feed = &cfg.feed;
    let source = HttpSnapshotSource::new(
        &feed.url,
        feed.poll_interval(),
        feed.retry_interval(),
        feed.request_timeout(),
        feed.record_path.clone(),
    )?;

    tracing::info!(url = %feed.url, interval_secs = feed.poll_interval_secs, "polling site feed");

    let pipeline: Pipeline<_, Snapshot, _> = Pipeline {
        source,
        transforms: vec![Arc::new(transform::EmptySnapshotGuard)],
        sink,
    };

    pipeline.run().await?;

    Ok(())
}

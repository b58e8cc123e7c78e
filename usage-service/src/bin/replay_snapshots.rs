use anyhow::{bail, Result};
use std::{env, sync::Arc};
use usage_core::timezone::FixedZoneResolver;
use usage_service::{
    config::AppConfig,
    observability,
    pipeline::Pipeline,
    sinks::ReconcileSink,
    sources::SnapshotFileSource,
    store,
    transform,
    NetworkReconciler,
    Snapshot,
    WorkingSet,
};

/// Rebuild documents by replaying a snapshot recording through the
/// reconciler, in recorded order and with recorded timestamps.
///
/// Usage:
///   replay_snapshots <ndjson_file_path>
#[tokio::main]
async fn main() -> Result<()> {
    observability::init_tracing();

    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        bail!("usage: replay_snapshots <ndjson_file_path>");
    }
    let file_path = &args[1];

    // USAGE_CONFIG can point at a replay-specific file, e.g. a memory store.
    let cfg = AppConfig::load()?;

    let store = store::connect(&cfg.store).await?;
    let resolver = FixedZoneResolver::new(cfg.timezone.default.clone());
    let reconciler = NetworkReconciler::new(store, resolver, cfg.working_set.retention_cycles);
    let working_set = WorkingSet::shared();
    let sink = ReconcileSink::new(working_set.clone(), reconciler);

    let pipeline: Pipeline<_, Snapshot, _> = Pipeline {
        source: SnapshotFileSource::new(file_path),
        transforms: vec![Arc::new(transform::EmptySnapshotGuard)],
        sink,
    };

    pipeline.run().await?;

    let set = working_set.read().await;
    let (sites, stations, meters) = set.len();
    tracing::info!(cycles = set.cycle(), sites, stations, meters, "replay finished");

    Ok(())
}

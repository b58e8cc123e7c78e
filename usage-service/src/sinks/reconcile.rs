use std::time::Instant;

use futures::StreamExt;
use usage_core::{db::DocumentStore, timezone::TimezoneResolver};

use crate::pipeline::{Envelope, PipelineError, Sink};
use crate::reconciler::{IngestReport, NetworkReconciler, SharedWorkingSet, Snapshot};

/// Terminal stage: reconciles each snapshot into the shared working set.
///
/// The write lock is held for one whole snapshot, so readers never see a
/// half-applied cycle.
pub struct ReconcileSink<S, R> {
    working_set: SharedWorkingSet,
    reconciler: NetworkReconciler<S, R>,
}

impl<S, R> ReconcileSink<S, R>
where
    S: DocumentStore,
    R: TimezoneResolver,
{
    pub fn new(working_set: SharedWorkingSet, reconciler: NetworkReconciler<S, R>) -> Self {
        Self {
            working_set,
            reconciler,
        }
    }

    pub fn working_set(&self) -> SharedWorkingSet {
        self.working_set.clone()
    }

    pub async fn reconcile(&self, env: &Envelope<Snapshot>) -> IngestReport {
        let started = Instant::now();
        let report = {
            let mut set = self.working_set.write().await;
            self.reconciler.ingest(&mut set, &env.payload, env.observed_at()).await
        };
        record_metrics(&report, started);
        report
    }
}

fn record_metrics(report: &IngestReport, started: Instant) {
    metrics::counter!("reconcile_cycles_total").increment(1);
    metrics::histogram!("reconcile_duration_seconds").record(started.elapsed().as_secs_f64());

    for (collection, written) in [
        ("sites", report.sites_written),
        ("stations", report.stations_written),
        ("meters", report.meters_written),
    ] {
        if written > 0 {
            metrics::counter!("reconcile_documents_written_total", "collection" => collection)
                .increment(written as u64);
        }
    }

    for anomaly in &report.anomalies {
        metrics::counter!("reconcile_anomalies_total", "kind" => anomaly.kind()).increment(1);
    }

    let evicted = report.evicted_sites + report.evicted_stations + report.evicted_meters;
    if evicted > 0 {
        metrics::counter!("working_set_evicted_total").increment(evicted as u64);
    }

    tracing::info!(
        cycle = report.cycle,
        sites = report.sites_seen,
        stations = report.stations_seen,
        meters = report.meters_seen,
        written = report.documents_written(),
        anomalies = report.anomalies.len(),
        load_failures = report.load_failures,
        write_failures = report.write_failures,
        evicted,
        "snapshot reconciled"
    );
}

#[async_trait::async_trait]
impl<S, R> Sink<Snapshot> for ReconcileSink<S, R>
where
    S: DocumentStore,
    R: TimezoneResolver,
{
    async fn run<St>(&self, mut input: St) -> Result<(), PipelineError>
    where
        St: futures::Stream<Item = Result<Envelope<Snapshot>, PipelineError>> + Send + Unpin + 'static,
    {
        while let Some(item) = input.next().await {
            let env = match item {
                Ok(env) => env,
                Err(e) => {
                    tracing::error!(error = %e, "error in upstream pipeline for ReconcileSink");
                    continue;
                }
            };

            self.reconcile(&env).await;
        }

        tracing::info!("snapshot stream ended");
        Ok(())
    }
}

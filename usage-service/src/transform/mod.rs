use crate::pipeline::{Envelope, PipelineError, Transform};
use crate::reconciler::Snapshot;

/// Rejects a snapshot carrying no sites.
///
/// An empty body usually means the feed hiccupped. Passing it on would
/// advance the working-set cycle clock without stamping anything, ageing
/// every entity towards eviction.
pub fn reject_empty_snapshot(env: Envelope<Snapshot>) -> Result<Envelope<Snapshot>, PipelineError> {
    if env.payload.sites.is_empty() {
        return Err(PipelineError::Transform("snapshot contains no sites".to_string()));
    }
    Ok(env)
}

#[derive(Clone, Default)]
pub struct EmptySnapshotGuard;

#[async_trait::async_trait]
impl Transform<Snapshot, Snapshot> for EmptySnapshotGuard {
    async fn apply(&self, input: Envelope<Snapshot>) -> Result<Envelope<Snapshot>, PipelineError> {
        match reject_empty_snapshot(input) {
            Ok(env) => Ok(env),
            Err(e) => {
                metrics::counter!("snapshot_rejected_empty_total").increment(1);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_snapshot_with_sites() {
        let env = Envelope::now(Snapshot {
            sites: vec![json!({"id": "s-1"})],
        });
        assert!(reject_empty_snapshot(env).is_ok());
    }

    #[tokio::test]
    async fn guard_rejects_empty_snapshot() {
        let env = Envelope::now(Snapshot { sites: Vec::new() });
        let res = EmptySnapshotGuard.apply(env).await;
        assert!(matches!(res, Err(PipelineError::Transform(_))));
    }
}

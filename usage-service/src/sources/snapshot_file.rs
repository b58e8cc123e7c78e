use std::{path::PathBuf, time::SystemTime};

use async_stream::stream;
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader},
};

use super::RecordedSnapshot;
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};
use crate::reconciler::Snapshot;

/// Replays an NDJSON snapshot recording, one [`RecordedSnapshot`] per line.
///
/// Each envelope carries the recorded fetch time, so durations and usage
/// slots come out as they would have live.
pub struct SnapshotFileSource {
    path: PathBuf,
}

impl SnapshotFileSource {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

fn parse_line(line: &str) -> Result<Envelope<Snapshot>, PipelineError> {
    let recorded: RecordedSnapshot = serde_json::from_str(line)
        .map_err(|e| PipelineError::Source(format!("failed to parse snapshot line: {e}")))?;
    Ok(Envelope {
        received_at: SystemTime::from(recorded.observed_at),
        payload: Snapshot {
            sites: recorded.sites,
        },
    })
}

#[async_trait::async_trait]
impl Source<Snapshot> for SnapshotFileSource {
    async fn stream(&self) -> EnvelopeStream<Snapshot> {
        let path = self.path.clone();
        let s = stream! {
            let file = match File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    yield Err(PipelineError::Source(format!("failed to open snapshot recording: {e}")));
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();

            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if line.trim().is_empty() => continue,
                    Ok(Some(line)) => match parse_line(&line) {
                        Ok(env) => yield Ok(env),
                        Err(e) => {
                            // A bad line is reported and skipped; the replay goes on.
                            metrics::counter!("snapshot_replay_parse_errors_total").increment(1);
                            yield Err(e);
                        }
                    },
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(PipelineError::Source(format!("failed to read snapshot recording: {e}")));
                        break;
                    }
                }
            }
        };

        Box::pin(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[test]
    fn parse_line_uses_recorded_time() {
        let env = parse_line(r#"{"observed_at":"2024-01-01T12:00:00Z","sites":[{"id":"s-1"}]}"#).unwrap();
        assert_eq!(env.observed_at().unix_timestamp(), 1_704_110_400);
        assert_eq!(env.payload.sites.len(), 1);
    }

    #[test]
    fn parse_line_rejects_non_array_sites() {
        let err = parse_line(r#"{"observed_at":"2024-01-01T12:00:00Z","sites":{}}"#).unwrap_err();
        assert!(matches!(err, PipelineError::Source(_)));
    }

    #[tokio::test]
    async fn replays_every_line_in_order() {
        let path = std::env::temp_dir().join(format!("usage-replay-{}.ndjson", std::process::id()));
        tokio::fs::write(
            &path,
            concat!(
                r#"{"observed_at":"2024-01-01T12:00:00Z","sites":[]}"#,
                "\n\n",
                r#"{"observed_at":"2024-01-01T12:00:15Z","sites":[{"id":"s-1"}]}"#,
                "\n",
            ),
        )
        .await
        .unwrap();

        let items: Vec<_> = SnapshotFileSource::new(&path).stream().await.collect().await;
        tokio::fs::remove_file(&path).await.ok();

        assert_eq!(items.len(), 2);
        let second = items[1].as_ref().unwrap();
        assert_eq!(second.observed_at().unix_timestamp(), 1_704_110_415);
    }

    #[tokio::test]
    async fn bad_line_is_reported_and_replay_continues() {
        let path = std::env::temp_dir().join(format!("usage-replay-bad-{}.ndjson", std::process::id()));
        tokio::fs::write(
            &path,
            concat!(
                r#"{"observed_at":"2024-01-01T12:00:00Z","sites":[{"id":"s-1"}]}"#,
                "\n",
                "{not json\n",
                r#"{"observed_at":"2024-01-01T12:00:30Z","sites":[{"id":"s-1"}]}"#,
                "\n",
            ),
        )
        .await
        .unwrap();

        let items: Vec<_> = SnapshotFileSource::new(&path).stream().await.collect().await;
        tokio::fs::remove_file(&path).await.ok();

        assert_eq!(items.len(), 3);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(PipelineError::Source(_))));
        assert_eq!(items[2].as_ref().unwrap().observed_at().unix_timestamp(), 1_704_110_430);
    }

    #[tokio::test]
    async fn missing_file_yields_one_error() {
        let items: Vec<_> = SnapshotFileSource::new("/nonexistent/usage-replay.ndjson")
            .stream()
            .await
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
    }
}

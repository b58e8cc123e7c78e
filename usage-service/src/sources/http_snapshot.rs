use std::{path::PathBuf, time::Duration};

use futures::StreamExt;
use tokio::io::AsyncWriteExt;

use super::RecordedSnapshot;
use crate::pipeline::{Envelope, EnvelopeStream, PipelineError, Source};
use crate::reconciler::Snapshot;

/// Polls the public sites endpoint forever.
///
/// After a successful fetch the next one waits `poll_interval`; after a
/// failure it waits `retry_interval` instead. Failures are yielded as errors
/// and never end the stream.
#[derive(Clone)]
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    url: String,
    poll_interval: Duration,
    retry_interval: Duration,
    record_path: Option<PathBuf>,
}

impl HttpSnapshotSource {
    pub fn new(
        url: &str,
        poll_interval: Duration,
        retry_interval: Duration,
        request_timeout: Duration,
        record_path: Option<PathBuf>,
    ) -> Result<Self, PipelineError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .gzip(true)
            .build()
            .map_err(|e| PipelineError::Source(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.to_string(),
            poll_interval,
            retry_interval,
            record_path,
        })
    }

    pub async fn fetch(&self) -> Result<Snapshot, PipelineError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| PipelineError::Source(format!("snapshot fetch failed: {e}")))?;

        response
            .json::<Snapshot>()
            .await
            .map_err(|e| PipelineError::Source(format!("snapshot body is not a site array: {e}")))
    }

    async fn record(&self, env: &Envelope<Snapshot>) {
        let Some(path) = &self.record_path else {
            return;
        };
        let line = RecordedSnapshot {
            observed_at: env.observed_at(),
            sites: env.payload.sites.clone(),
        };
        let result = async {
            let mut text = serde_json::to_string(&line)?;
            text.push('\n');
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(text.as_bytes()).await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if let Err(e) = result {
            tracing::warn!(error = %e, path = %path.display(), "failed to record snapshot");
        }
    }
}

#[async_trait::async_trait]
impl Source<Snapshot> for HttpSnapshotSource {
    async fn stream(&self) -> EnvelopeStream<Snapshot> {
        let this = self.clone();
        let s = async_stream::stream! {
            loop {
                metrics::counter!("snapshot_fetch_total").increment(1);
                match this.fetch().await {
                    Ok(snapshot) => {
                        let env = Envelope::now(snapshot);
                        this.record(&env).await;
                        yield Ok(env);
                        tokio::time::sleep(this.poll_interval).await;
                    }
                    Err(e) => {
                        metrics::counter!("snapshot_fetch_failed_total").increment(1);
                        yield Err(e);
                        tokio::time::sleep(this.retry_interval).await;
                    }
                }
            }
        };

        s.boxed()
    }
}

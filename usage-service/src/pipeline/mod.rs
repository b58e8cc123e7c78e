use std::{pin::Pin, sync::Arc, time::SystemTime};

use futures::{Stream, StreamExt};
use time::OffsetDateTime;

/// One unit flowing through the pipeline, stamped with when it was observed.
#[derive(Debug, Clone)]
pub struct Envelope<T> {
    pub payload: T,
    pub received_at: SystemTime,
}

impl<T> Envelope<T> {
    pub fn now(payload: T) -> Self {
        Self {
            payload,
            received_at: SystemTime::now(),
        }
    }

    pub fn observed_at(&self) -> OffsetDateTime {
        OffsetDateTime::from(self.received_at)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("source error: {0}")]
    Source(String),
    #[error("transform error: {0}")]
    Transform(String),
    #[error("sink error: {0}")]
    Sink(String),
}

pub type EnvelopeStream<T> = Pin<Box<dyn Stream<Item = Result<Envelope<T>, PipelineError>> + Send>>;

#[async_trait::async_trait]
pub trait Source<T>: Send + Sync {
    async fn stream(&self) -> EnvelopeStream<T>;
}

#[async_trait::async_trait]
pub trait Transform<I, O>: Send + Sync {
    async fn apply(&self, input: Envelope<I>) -> Result<Envelope<O>, PipelineError>;
}

#[async_trait::async_trait]
pub trait Sink<T>: Send + Sync {
    async fn run<S>(&self, input: S) -> Result<(), PipelineError>
    where
        S: Stream<Item = Result<Envelope<T>, PipelineError>> + Send + Unpin + 'static;
}

/// Source → transforms → sink. Items are pulled one at a time, so the sink
/// finishes with one snapshot before the source is asked for the next.
pub struct Pipeline<S, T, K> {
    pub source: S,
    pub transforms: Vec<Arc<dyn Transform<T, T> + Send + Sync>>,
    pub sink: K,
}

impl<T, S, K> Pipeline<S, T, K>
where
    T: Send + 'static,
    S: Source<T> + Send + Sync + 'static,
    K: Sink<T> + Send + Sync + 'static,
{
    pub async fn run(self) -> Result<(), PipelineError> {
        let mut stream = self.source.stream().await;

        for t in self.transforms {
            stream = Box::pin(stream.then(move |item| {
                let t = t.clone();
                async move {
                    match item {
                        Ok(env) => t.apply(env).await,
                        Err(e) => Err(e),
                    }
                }
            }));
        }

        self.sink.run(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Numbers(Vec<u32>);

    #[async_trait::async_trait]
    impl Source<u32> for Numbers {
        async fn stream(&self) -> EnvelopeStream<u32> {
            let items: Vec<_> = self.0.iter().map(|n| Ok(Envelope::now(*n))).collect();
            Box::pin(futures::stream::iter(items))
        }
    }

    struct RejectOdd;

    #[async_trait::async_trait]
    impl Transform<u32, u32> for RejectOdd {
        async fn apply(&self, input: Envelope<u32>) -> Result<Envelope<u32>, PipelineError> {
            if input.payload % 2 == 1 {
                Err(PipelineError::Transform("odd".into()))
            } else {
                Ok(input)
            }
        }
    }

    #[derive(Default)]
    struct Collect(Arc<Mutex<Vec<Result<u32, String>>>>);

    #[async_trait::async_trait]
    impl Sink<u32> for Collect {
        async fn run<S>(&self, mut input: S) -> Result<(), PipelineError>
        where
            S: Stream<Item = Result<Envelope<u32>, PipelineError>> + Send + Unpin + 'static,
        {
            while let Some(item) = input.next().await {
                let entry = item.map(|e| e.payload).map_err(|e| e.to_string());
                self.0.lock().unwrap().push(entry);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn transforms_reject_items_without_stopping_the_stream() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let pipeline: Pipeline<_, u32, _> = Pipeline {
            source: Numbers(vec![2, 3, 4]),
            transforms: vec![Arc::new(RejectOdd)],
            sink: Collect(seen.clone()),
        };
        pipeline.run().await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![Ok(2), Err("transform error: odd".to_string()), Ok(4)]
        );
    }

    #[test]
    fn observed_at_follows_received_at() {
        let env = Envelope {
            payload: (),
            received_at: SystemTime::UNIX_EPOCH + std::time::Duration::from_secs(86_400),
        };
        assert_eq!(env.observed_at().unix_timestamp(), 86_400);
    }
}

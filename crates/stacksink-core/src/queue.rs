//! The serialization queue.
//!
//! A bounded channel with a single consumer task. Every handler invocation
//! passes through `submit`, so store writes happen strictly in submission
//! order no matter how many requests the HTTP layer is decoding
//! concurrently. The queue is the sole writer to the store; reorg
//! resolution depends on this ordering.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::error::IngestError;

type JobFuture = Pin<Box<dyn Future<Output = Result<(), IngestError>> + Send>>;

struct Job {
    fut: JobFuture,
    done: oneshot::Sender<Result<(), IngestError>>,
}

/// Counters for queue observability.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    processed: AtomicU64,
    failed: AtomicU64,
}

impl QueueMetrics {
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Handle to the single-writer queue. Cheaply cloneable.
#[derive(Clone)]
pub struct SerialQueue {
    tx: mpsc::Sender<Job>,
    metrics: Arc<QueueMetrics>,
}

impl SerialQueue {
    /// Spawn the consumer task and return the submission handle.
    ///
    /// `capacity` bounds in-flight submissions; senders beyond it wait,
    /// which is the back-pressure the node's retry loop expects.
    pub fn new(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity);
        let metrics = Arc::new(QueueMetrics::default());
        let consumer_metrics = Arc::clone(&metrics);

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let result = job.fut.await;
                match &result {
                    Ok(()) => {
                        consumer_metrics.processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(err) => {
                        consumer_metrics.failed.fetch_add(1, Ordering::Relaxed);
                        error!(%err, "queued handler failed; continuing with next item");
                    }
                }
                // The submitter may have gone away (connection reset); the
                // work is already committed either way.
                let _ = job.done.send(result);
            }
            debug!("serialization queue drained and closed");
        });

        Self { tx, metrics }
    }

    /// Run `fut` on the consumer, after everything submitted before it.
    /// Resolves once the job has completed, with its result.
    pub async fn submit<F>(&self, fut: F) -> Result<(), IngestError>
    where
        F: Future<Output = Result<(), IngestError>> + Send + 'static,
    {
        let (done, completion) = oneshot::channel();
        self.tx
            .send(Job {
                fut: Box::pin(fut),
                done,
            })
            .await
            .map_err(|_| IngestError::QueueClosed)?;
        completion.await.map_err(|_| IngestError::QueueClosed)?
    }

    pub fn metrics(&self) -> &QueueMetrics {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[tokio::test]
    async fn jobs_run_in_submission_order() {
        let queue = SerialQueue::new(8);
        let log: Arc<Mutex<Vec<u32>>> = Arc::default();

        let mut submissions = Vec::new();
        for i in 0..5u32 {
            let queue = queue.clone();
            let log = Arc::clone(&log);
            submissions.push(async move {
                queue
                    .submit(async move {
                        // Later jobs sleep less: only serialization keeps order.
                        tokio::time::sleep(Duration::from_millis(u64::from(10 - i))).await;
                        log.lock().unwrap().push(i);
                        Ok(())
                    })
                    .await
            });
        }
        // The channel capacity exceeds the job count, so the first poll of
        // each submission enqueues it; join_all polls in vec order.
        let results = futures::future::join_all(submissions).await;
        assert!(results.into_iter().all(|r| r.is_ok()));
        assert_eq!(*log.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn a_failed_job_does_not_stall_the_queue() {
        let queue = SerialQueue::new(4);
        let err = queue
            .submit(async { Err(IngestError::decode("test", "boom")) })
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Decode { .. }));

        queue.submit(async { Ok(()) }).await.unwrap();
        assert_eq!(queue.metrics().failed(), 1);
        assert_eq!(queue.metrics().processed(), 1);
    }
}

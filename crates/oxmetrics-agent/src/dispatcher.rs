//! Turns the sampler's state into report jobs for the worker pool.

use crate::error::{DispatchError, PoolError};
use crate::pool::{Job, WorkerPool};
use crate::sampler::{Batch, Sampler};
use crate::transport::Transport;
use oxmetrics_common::retry::{Retry, RetryError};
use std::sync::Arc;

#[derive(Clone)]
pub struct Dispatcher {
    sampler: Arc<Sampler>,
    transport: Arc<dyn Transport>,
    retry: Retry<DispatchError>,
}

impl Dispatcher {
    pub fn new(sampler: Arc<Sampler>, transport: Arc<dyn Transport>) -> Self {
        Self {
            sampler,
            transport,
            retry: Retry::default().retry_if(DispatchError::is_retryable),
        }
    }

    pub fn with_retry(mut self, retry: Retry<DispatchError>) -> Self {
        self.retry = retry.retry_if(DispatchError::is_retryable);
        self
    }

    /// Sends `batch` with retries. Its reserved polls are acknowledged on
    /// success and handed back to the sampler on failure.
    pub async fn deliver(&self, batch: Batch) -> Result<(), DispatchError> {
        let transport = self.transport.clone();
        let outcome = self
            .retry
            .run(|_deadline| {
                let transport = transport.clone();
                let metrics = &batch.metrics;
                async move { transport.send(metrics).await }
            })
            .await;
        if outcome.is_err() {
            self.sampler.release(batch.poll_count).await;
        }
        match outcome {
            Ok(()) => {
                self.sampler.ack(batch.poll_count).await;
                tracing::info!(
                    transport = self.transport.name(),
                    count = batch.metrics.len(),
                    polls = batch.poll_count,
                    "Report sent"
                );
                Ok(())
            }
            Err(RetryError::Failed(e)) => Err(e),
            Err(RetryError::TimedOut { attempt, deadline }) => {
                Err(DispatchError::TimedOut { attempt, deadline })
            }
        }
    }

    /// Takes a copy of the current samples and queues its delivery. Waits
    /// while the pool queue is full.
    pub async fn report(&self, pool: &WorkerPool<DispatchError>) -> Result<(), PoolError> {
        let batch = self.sampler.batch().await;
        if batch.is_empty() {
            tracing::debug!("Nothing to report");
            return Ok(());
        }
        let reserved = batch.poll_count;
        let dispatcher = self.clone();
        let job: Job<DispatchError> = Box::new(move || Box::pin(async move { dispatcher.deliver(batch).await }));
        if let Err(e) = pool.add_job(job).await {
            self.sampler.release(reserved).await;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use oxmetrics_common::types::Metric;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Fails the first `failures` sends with `error`, then records batches.
    struct Scripted {
        failures: Mutex<Vec<DispatchError>>,
        sent: Mutex<Vec<Vec<Metric>>>,
    }

    impl Scripted {
        fn new(failures: Vec<DispatchError>) -> Arc<Self> {
            Arc::new(Self {
                failures: Mutex::new(failures),
                sent: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn send(&self, metrics: &[Metric]) -> Result<(), DispatchError> {
            if let Some(e) = self.failures.lock().unwrap().pop() {
                return Err(e);
            }
            self.sent.lock().unwrap().push(metrics.to_vec());
            Ok(())
        }
    }

    /// Accepts every batch after `delay`.
    struct Slow {
        delay: Duration,
        sent: Mutex<Vec<Vec<Metric>>>,
    }

    #[async_trait]
    impl Transport for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn send(&self, metrics: &[Metric]) -> Result<(), DispatchError> {
            tokio::time::sleep(self.delay).await;
            self.sent.lock().unwrap().push(metrics.to_vec());
            Ok(())
        }
    }

    fn poll_count_sent(sent: &[Vec<Metric>]) -> i64 {
        sent.iter()
            .flatten()
            .filter(|m| m.id == "PollCount")
            .map(|m| match m.value {
                oxmetrics_common::types::MetricValue::Counter(d) => d,
                oxmetrics_common::types::MetricValue::Gauge(_) => 0,
            })
            .sum()
    }

    fn unavailable() -> DispatchError {
        DispatchError::Status {
            status: 503,
            body: String::new(),
        }
    }

    fn fast_retry() -> Retry<DispatchError> {
        Retry::new(vec![Duration::from_millis(10); 3])
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_then_acked() {
        let sampler = Arc::new(Sampler::new());
        sampler.record_poll(vec![]).await;
        let transport = Scripted::new(vec![unavailable(), unavailable()]);
        let dispatcher = Dispatcher::new(sampler.clone(), transport.clone()).with_retry(fast_retry());

        let batch = sampler.batch().await;
        dispatcher.deliver(batch).await.unwrap();

        assert_eq!(transport.sent.lock().unwrap().len(), 1);
        assert_eq!(sampler.pending_polls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_keeps_polls_pending() {
        let sampler = Arc::new(Sampler::new());
        sampler.record_poll(vec![]).await;
        let transport = Scripted::new(vec![DispatchError::Status {
            status: 400,
            body: "bad".into(),
        }]);
        let dispatcher = Dispatcher::new(sampler.clone(), transport.clone()).with_retry(fast_retry());

        let err = dispatcher.deliver(sampler.batch().await).await.unwrap_err();
        assert!(matches!(err, DispatchError::Status { status: 400, .. }));
        assert!(transport.sent.lock().unwrap().is_empty());
        assert_eq!(sampler.pending_polls().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn report_goes_through_the_pool() {
        let sampler = Arc::new(Sampler::new());
        let transport = Scripted::new(vec![]);
        let dispatcher = Dispatcher::new(sampler.clone(), transport.clone()).with_retry(fast_retry());
        let mut pool = WorkerPool::new(2).unwrap();
        let mut results = pool.take_results().unwrap();

        // nothing sampled yet
        dispatcher.report(&pool).await.unwrap();

        sampler.record_poll(vec![Metric::gauge("Alloc", 1.0)]).await;
        dispatcher.report(&pool).await.unwrap();
        results.recv().await.unwrap().unwrap();
        pool.shutdown().await;
        assert!(results.recv().await.is_none());

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains(&Metric::counter("PollCount", 1)));
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_reports_send_each_poll_once() {
        let sampler = Arc::new(Sampler::new());
        sampler.record_poll(vec![]).await;
        sampler.record_poll(vec![]).await;
        let transport = Arc::new(Slow {
            delay: Duration::from_millis(500),
            sent: Mutex::new(Vec::new()),
        });
        let dispatcher = Dispatcher::new(sampler.clone(), transport.clone())
            .with_retry(Retry::new(vec![Duration::from_secs(1)]));
        let mut pool = WorkerPool::new(1).unwrap();
        let mut results = pool.take_results().unwrap();

        dispatcher.report(&pool).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // the first batch is still in flight
        dispatcher.report(&pool).await.unwrap();

        results.recv().await.unwrap().unwrap();
        results.recv().await.unwrap().unwrap();
        pool.shutdown().await;

        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert_eq!(poll_count_sent(&sent), 2);
        assert!(sent[1].iter().all(|m| m.id != "PollCount"));
        drop(sent);
        assert_eq!(sampler.pending_polls().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_delivery_returns_polls_to_the_next_report() {
        let sampler = Arc::new(Sampler::new());
        sampler.record_poll(vec![]).await;
        let transport = Scripted::new(vec![DispatchError::Status {
            status: 400,
            body: "bad".into(),
        }]);
        let dispatcher = Dispatcher::new(sampler.clone(), transport.clone()).with_retry(fast_retry());

        assert!(dispatcher.deliver(sampler.batch().await).await.is_err());
        sampler.record_poll(vec![]).await;
        dispatcher.deliver(sampler.batch().await).await.unwrap();

        let sent = transport.sent.lock().unwrap();
        assert_eq!(poll_count_sent(&sent), 2);
        drop(sent);
        assert_eq!(sampler.pending_polls().await, 0);
    }
}

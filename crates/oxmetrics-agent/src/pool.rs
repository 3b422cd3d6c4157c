//! Fixed-size pool of async workers fed through a bounded job queue.

use crate::error::PoolError;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// A unit of work: a closure producing the future to run.
pub type Job<E> = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), E>> + Send>;

/// `N` workers sharing one job queue of capacity `N`.
///
/// Every finished job reports its outcome on the result channel (also of
/// capacity `N`). The owner must drain [`WorkerPool::take_results`], or
/// workers stall once it fills. The result channel closes after the last
/// worker exits, which happens once [`WorkerPool::shutdown`] closes the job
/// queue and the queue is drained.
pub struct WorkerPool<E> {
    jobs: mpsc::Sender<Job<E>>,
    results: Option<mpsc::Receiver<Result<(), E>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<E: Send + 'static> WorkerPool<E> {
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::NoWorkers);
        }
        let (jobs, queue) = mpsc::channel::<Job<E>>(size);
        let (results_tx, results) = mpsc::channel(size);
        let queue = Arc::new(Mutex::new(queue));

        let workers = (0..size)
            .map(|worker| {
                let queue = queue.clone();
                let results = results_tx.clone();
                tokio::spawn(async move {
                    loop {
                        let job = queue.lock().await.recv().await;
                        let Some(job) = job else { break };
                        if results.send(job().await).await.is_err() {
                            tracing::debug!(worker, "Result channel closed, dropping outcome");
                        }
                    }
                    tracing::debug!(worker, "Worker stopped");
                })
            })
            .collect();

        Ok(Self {
            jobs,
            results: Some(results),
            workers,
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job, waiting while the queue is full.
    pub async fn add_job(&self, job: Job<E>) -> Result<(), PoolError> {
        self.jobs.send(job).await.map_err(|_| PoolError::Closed)
    }

    /// Hands out the result channel. Only the first call returns it.
    pub fn take_results(&mut self) -> Option<mpsc::Receiver<Result<(), E>>> {
        self.results.take()
    }

    /// Closes the job queue and waits for the workers to finish what is
    /// already queued.
    pub async fn shutdown(self) {
        drop(self.jobs);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker task failed");
            }
        }
    }
}

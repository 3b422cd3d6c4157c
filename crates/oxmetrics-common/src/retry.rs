//! Fixed-schedule retry for fallible async operations.
//!
//! Each schedule entry is one attempt and doubles as that attempt's deadline.
//! After a retryable failure the loop waits out the remainder of the slot, so
//! fast failures still back off by the schedule.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_SCHEDULE: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(3),
    Duration::from_secs(5),
];

/// Outcome of a failed retry loop.
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E> {
    /// The operation returned an error; for retryable errors this is the one
    /// from the final attempt.
    #[error(transparent)]
    Failed(E),

    /// The final attempt did not finish within its deadline.
    #[error("attempt {attempt} timed out after {deadline:?}")]
    TimedOut { attempt: usize, deadline: Duration },
}

impl<E> RetryError<E> {
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Failed(e) => Some(e),
            RetryError::TimedOut { .. } => None,
        }
    }
}

type Predicate<E> = Arc<dyn Fn(&E) -> bool + Send + Sync>;

/// Retry policy: a deadline schedule plus an optional "is retryable" predicate.
/// Without a predicate every error is retried.
pub struct Retry<E> {
    schedule: Vec<Duration>,
    retryable: Option<Predicate<E>>,
}

impl<E> Clone for Retry<E> {
    fn clone(&self) -> Self {
        Self {
            schedule: self.schedule.clone(),
            retryable: self.retryable.clone(),
        }
    }
}

impl<E> Default for Retry<E> {
    fn default() -> Self {
        Self::new(DEFAULT_SCHEDULE.to_vec())
    }
}

impl<E> Retry<E> {
    pub fn new(schedule: Vec<Duration>) -> Self {
        Self {
            schedule,
            retryable: None,
        }
    }

    pub fn retry_if(mut self, predicate: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        self.retryable = Some(Arc::new(predicate));
        self
    }

    pub fn schedule(&self) -> &[Duration] {
        &self.schedule
    }

    fn is_retryable(&self, err: &E) -> bool {
        self.retryable.as_ref().map_or(true, |p| p(err))
    }

    /// Runs `op` until it succeeds, hits a non-retryable error, or the
    /// schedule is exhausted. `op` receives the current attempt's deadline.
    ///
    /// An empty schedule still makes one attempt, without a deadline.
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut(Duration) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if self.schedule.is_empty() {
            return op(Duration::MAX).await.map_err(RetryError::Failed);
        }

        let last = self.schedule.len() - 1;
        for (attempt, &deadline) in self.schedule.iter().enumerate() {
            let started = Instant::now();
            match tokio::time::timeout(deadline, op(deadline)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    if attempt == last || !self.is_retryable(&e) {
                        return Err(RetryError::Failed(e));
                    }
                    tracing::debug!(attempt = attempt + 1, "Retryable failure");
                    tokio::time::sleep_until(started + deadline).await;
                }
                Err(_) => {
                    if attempt == last {
                        return Err(RetryError::TimedOut {
                            attempt: attempt + 1,
                            deadline,
                        });
                    }
                    tracing::debug!(attempt = attempt + 1, ?deadline, "Attempt timed out");
                }
            }
        }
        unreachable!("the final attempt always returns")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_k_retryable_failures() {
        let calls = AtomicUsize::new(0);
        let deadlines = Mutex::new(Vec::new());
        let retry = Retry::<&str>::new(vec![ms(100), ms(300), ms(500)])
            .retry_if(|e| *e == "transient");

        let out = retry
            .run(|deadline| {
                deadlines.lock().unwrap().push(deadline);
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err("transient")
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(out.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(*deadlines.lock().unwrap(), vec![ms(100), ms(300), ms(500)]);
    }

    #[tokio::test(start_paused = true)]
    async fn non_retryable_error_propagates_immediately() {
        let calls = AtomicUsize::new(0);
        let retry = Retry::<&str>::new(vec![ms(10); 3]).retry_if(|e| *e == "transient");

        let out: Result<(), _> = retry
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err("fatal") }
            })
            .await;

        assert!(matches!(out, Err(RetryError::Failed("fatal"))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn without_predicate_every_error_is_retried() {
        let calls = AtomicUsize::new(0);
        let retry: Retry<String> = Retry::new(vec![ms(10); 3]);

        let out: Result<(), _> = retry
            .run(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err(format!("attempt {n}")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        match out {
            Err(RetryError::Failed(msg)) => assert_eq!(msg, "attempt 2"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_attempt_hits_its_deadline() {
        let calls = AtomicUsize::new(0);
        let retry: Retry<()> = Retry::new(vec![ms(10), ms(20)]);

        let out: Result<(), _> = retry
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(matches!(
            out,
            Err(RetryError::TimedOut { attempt: 2, deadline }) if deadline == ms(20)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_attempt_waits_out_its_slot() {
        let retry: Retry<()> = Retry::new(vec![ms(100), ms(100)]);
        let started = Instant::now();
        let calls = AtomicUsize::new(0);

        let _ = retry
            .run(|_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move { if n == 0 { Err(()) } else { Ok(()) } }
            })
            .await;

        assert!(started.elapsed() >= ms(100));
    }
}

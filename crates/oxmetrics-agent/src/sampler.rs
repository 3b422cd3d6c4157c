//! The agent's local view of its latest samples.

use oxmetrics_common::types::{Metric, MetricValue};
use rand::Rng;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

#[derive(Debug, Default)]
struct Samples {
    gauges: BTreeMap<String, f64>,
    poll_count: i64,
    in_flight: i64,
}

/// A coherent copy of the samples, taken for one report.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub metrics: Vec<Metric>,
    /// The `PollCount` delta inside `metrics`. Reserved by [`Sampler::batch`]
    /// until it is acknowledged or released.
    pub poll_count: i64,
}

impl Batch {
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}

/// Latest gauge readings plus the number of polls not yet reported.
///
/// Pollers write under the lock; the reporter takes a copy and releases it
/// before any network I/O. Polls carried by a batch in flight are reserved,
/// so overlapping reports never send the same poll twice.
#[derive(Debug, Default)]
pub struct Sampler {
    samples: Mutex<Samples>,
}

impl Sampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one completed poll pass: its gauges, a fresh `RandomValue`,
    /// and one more `PollCount`.
    pub async fn record_poll(&self, metrics: Vec<Metric>) {
        let random: f64 = rand::thread_rng().gen();
        let mut samples = self.samples.lock().await;
        merge(&mut samples, metrics);
        samples.gauges.insert(RANDOM_VALUE.to_string(), random);
        samples.poll_count += 1;
    }

    /// Records gauges from a secondary source without counting a poll.
    pub async fn record(&self, metrics: Vec<Metric>) {
        let mut samples = self.samples.lock().await;
        merge(&mut samples, metrics);
    }

    /// Gauges sorted by id, then `PollCount` if any poll is neither delivered
    /// nor already in flight. Those polls move to the in-flight tally.
    pub async fn batch(&self) -> Batch {
        let mut samples = self.samples.lock().await;
        let mut metrics: Vec<Metric> = samples
            .gauges
            .iter()
            .map(|(id, v)| Metric::gauge(id.clone(), *v))
            .collect();
        let poll_count = samples.poll_count;
        if poll_count > 0 {
            metrics.push(Metric::counter(POLL_COUNT, poll_count));
        }
        samples.poll_count = 0;
        samples.in_flight += poll_count;
        Batch {
            metrics,
            poll_count,
        }
    }

    /// Marks `sent` reserved polls as delivered.
    pub async fn ack(&self, sent: i64) {
        let mut samples = self.samples.lock().await;
        samples.in_flight -= sent;
    }

    /// Returns `sent` reserved polls to pending after a failed delivery.
    pub async fn release(&self, sent: i64) {
        let mut samples = self.samples.lock().await;
        samples.in_flight -= sent;
        samples.poll_count += sent;
    }

    /// Polls not yet delivered, in flight or not.
    pub async fn pending_polls(&self) -> i64 {
        let samples = self.samples.lock().await;
        samples.poll_count + samples.in_flight
    }
}

fn merge(samples: &mut Samples, metrics: Vec<Metric>) {
    for metric in metrics {
        match metric.value {
            MetricValue::Gauge(v) => {
                samples.gauges.insert(metric.id, v);
            }
            MetricValue::Counter(_) => {
                tracing::debug!(id = %metric.id, "Ignoring counter from collector");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn poll_pass_counts_and_refreshes_random_value() {
        let sampler = Sampler::new();
        sampler
            .record_poll(vec![Metric::gauge("ResidentMemory", 1024.0)])
            .await;
        sampler.record_poll(vec![]).await;

        let batch = sampler.batch().await;
        assert_eq!(batch.poll_count, 2);
        let ids: Vec<&str> = batch.metrics.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["RandomValue", "ResidentMemory", "PollCount"]);
        assert_eq!(batch.metrics[2], Metric::counter("PollCount", 2));
        match batch.metrics[0].value {
            MetricValue::Gauge(v) => assert!((0.0..1.0).contains(&v)),
            MetricValue::Counter(_) => panic!("RandomValue must be a gauge"),
        }
    }

    #[tokio::test]
    async fn ack_keeps_polls_taken_during_delivery() {
        let sampler = Sampler::new();
        sampler.record_poll(vec![]).await;
        sampler.record_poll(vec![]).await;
        let batch = sampler.batch().await;

        sampler.record_poll(vec![]).await;
        sampler.ack(batch.poll_count).await;
        assert_eq!(sampler.pending_polls().await, 1);

        let batch = sampler.batch().await;
        assert_eq!(batch.poll_count, 1);
        sampler.ack(batch.poll_count).await;
        let batch = sampler.batch().await;
        assert!(batch.metrics.iter().all(|m| m.id != POLL_COUNT));
        assert_eq!(sampler.pending_polls().await, 0);
    }

    #[tokio::test]
    async fn in_flight_polls_are_not_batched_twice() {
        let sampler = Sampler::new();
        sampler.record_poll(vec![]).await;
        sampler.record_poll(vec![]).await;

        let first = sampler.batch().await;
        let second = sampler.batch().await;
        assert_eq!(first.poll_count, 2);
        assert_eq!(second.poll_count, 0);
        assert!(second.metrics.iter().all(|m| m.id != POLL_COUNT));
        assert_eq!(sampler.pending_polls().await, 2);

        sampler.release(first.poll_count).await;
        sampler.record_poll(vec![]).await;
        let retry = sampler.batch().await;
        assert_eq!(retry.poll_count, 3);
        assert!(retry.metrics.contains(&Metric::counter(POLL_COUNT, 3)));
    }

    #[tokio::test]
    async fn secondary_gauges_do_not_count_as_polls() {
        let sampler = Sampler::new();
        assert!(sampler.batch().await.is_empty());

        sampler
            .record(vec![
                Metric::gauge("TotalMemory", 8.0),
                Metric::counter("Ignored", 1),
            ])
            .await;
        let batch = sampler.batch().await;
        assert_eq!(batch.poll_count, 0);
        assert_eq!(batch.metrics, vec![Metric::gauge("TotalMemory", 8.0)]);
    }
}

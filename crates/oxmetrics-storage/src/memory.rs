//! In-memory aggregation store.
//!
//! Both maps live behind one [`tokio::sync::RwLock`] so a snapshot always sees
//! counters and gauges from the same instant. Tokio's lock is fair, so a
//! waiting writer is not starved by a stream of readers.
//!
//! Snapshots are serialized: each one copies the store only after the
//! previous save finished, so saves reach the persister in copy order.

use crate::error::Result;
use crate::{Persister, Snapshot};
use oxmetrics_common::types::{Metric, MetricKey, MetricKind, MetricValue};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

pub struct MetricStore {
    data: RwLock<Snapshot>,
    persister: Option<Arc<dyn Persister>>,
    save_lock: Mutex<()>,
    sync_snapshots: bool,
}

impl MetricStore {
    /// Creates an empty store. Without a persister, snapshot and restore are
    /// no-ops and the health check always succeeds.
    pub fn new(persister: Option<Arc<dyn Persister>>) -> Self {
        Self {
            data: RwLock::new(Snapshot::default()),
            persister,
            save_lock: Mutex::new(()),
            sync_snapshots: false,
        }
    }

    /// When enabled, every mutation is followed by a snapshot.
    pub fn with_sync_snapshots(mut self, enabled: bool) -> Self {
        self.sync_snapshots = enabled;
        self
    }

    pub fn persister(&self) -> Option<&Arc<dyn Persister>> {
        self.persister.as_ref()
    }

    /// Adds `delta` to the counter and returns the new total.
    pub async fn add_counter(&self, id: &str, delta: i64) -> i64 {
        let total = {
            let mut data = self.data.write().await;
            add(&mut data.counters, id, delta)
        };
        self.after_mutation().await;
        total
    }

    pub async fn set_gauge(&self, id: &str, value: f64) {
        {
            let mut data = self.data.write().await;
            data.gauges.insert(id.to_string(), value);
        }
        self.after_mutation().await;
    }

    /// Applies one metric and returns the stored result: the new counter
    /// total or the gauge as written.
    pub async fn apply(&self, metric: &Metric) -> Metric {
        match metric.value {
            MetricValue::Counter(delta) => {
                Metric::counter(metric.id.clone(), self.add_counter(&metric.id, delta).await)
            }
            MetricValue::Gauge(value) => {
                self.set_gauge(&metric.id, value).await;
                metric.clone()
            }
        }
    }

    /// Applies a validated batch in order under a single write lock.
    pub async fn apply_batch(&self, metrics: &[Metric]) {
        if metrics.is_empty() {
            return;
        }
        {
            let mut data = self.data.write().await;
            for metric in metrics {
                match metric.value {
                    MetricValue::Counter(delta) => {
                        add(&mut data.counters, &metric.id, delta);
                    }
                    MetricValue::Gauge(value) => {
                        data.gauges.insert(metric.id.clone(), value);
                    }
                }
            }
        }
        self.after_mutation().await;
    }

    pub async fn get_counter(&self, id: &str) -> Option<i64> {
        self.data.read().await.counters.get(id).copied()
    }

    pub async fn get_gauge(&self, id: &str) -> Option<f64> {
        self.data.read().await.gauges.get(id).copied()
    }

    pub async fn get(&self, key: &MetricKey) -> Option<Metric> {
        match key.kind {
            MetricKind::Counter => self
                .get_counter(&key.id)
                .await
                .map(|v| Metric::counter(key.id.clone(), v)),
            MetricKind::Gauge => self
                .get_gauge(&key.id)
                .await
                .map(|v| Metric::gauge(key.id.clone(), v)),
        }
    }

    pub async fn list_counters(&self) -> HashMap<String, i64> {
        self.data.read().await.counters.clone()
    }

    pub async fn list_gauges(&self) -> HashMap<String, f64> {
        self.data.read().await.gauges.clone()
    }

    /// Every stored metric, gauges first, each family sorted by id.
    pub async fn list(&self) -> Vec<Metric> {
        let copy = self.data.read().await.clone();
        let mut out = Vec::with_capacity(copy.len());
        out.extend(
            copy.sorted_gauges()
                .into_iter()
                .map(|(id, v)| Metric::gauge(id, v)),
        );
        out.extend(
            copy.sorted_counters()
                .into_iter()
                .map(|(id, v)| Metric::counter(id, v)),
        );
        out
    }

    /// Writes a coherent copy of the store to the persister.
    pub async fn snapshot(&self) -> Result<()> {
        let Some(persister) = &self.persister else {
            return Ok(());
        };
        let _saving = self.save_lock.lock().await;
        let copy = self.data.read().await.clone();
        persister.save(&copy).await
    }

    /// Loads the persisted state and merges it into the store. Returns the
    /// number of metrics restored. Malformed records are logged and skipped.
    pub async fn restore(&self) -> Result<usize> {
        let Some(persister) = &self.persister else {
            return Ok(0);
        };
        let restored = persister.restore().await?;
        if let Some(warning) = restored.warning() {
            tracing::warn!(backend = persister.name(), error = %warning, "Partial restore");
        }

        let count = restored.snapshot.len();
        let mut data = self.data.write().await;
        for (id, delta) in restored.snapshot.counters {
            add(&mut data.counters, &id, delta);
        }
        data.gauges.extend(restored.snapshot.gauges);
        tracing::info!(backend = persister.name(), count, "Store restored");
        Ok(count)
    }

    pub async fn check(&self) -> Result<()> {
        match &self.persister {
            Some(persister) => persister.check().await,
            None => Ok(()),
        }
    }

    pub async fn close(&self) -> Result<()> {
        match &self.persister {
            Some(persister) => persister.close().await,
            None => Ok(()),
        }
    }

    async fn after_mutation(&self) {
        if !self.sync_snapshots {
            return;
        }
        if let Err(e) = self.snapshot().await {
            tracing::error!(error = %e, "Synchronous snapshot failed");
        }
    }
}

/// Counters wrap on overflow rather than panic on client input.
fn add(counters: &mut HashMap<String, i64>, id: &str, delta: i64) -> i64 {
    let entry = counters.entry(id.to_string()).or_insert(0);
    *entry = entry.wrapping_add(delta);
    *entry
}

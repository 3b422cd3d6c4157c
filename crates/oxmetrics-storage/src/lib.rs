//! Metric storage: the in-memory aggregation store and the durable
//! persisters it snapshots into.
//!
//! [`memory::MetricStore`] owns the live counters and gauges. A [`Persister`]
//! (file or database) receives full snapshots and restores them on boot.

pub mod database;
pub mod error;
pub mod file;
pub mod memory;


use async_trait::async_trait;
use error::Result;
use std::collections::HashMap;

/// A coherent copy of the whole store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub counters: HashMap<String, i64>,
    pub gauges: HashMap<String, f64>,
}

impl Snapshot {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.gauges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counters.len() + self.gauges.len()
    }

    /// Counters sorted by id, for deterministic output.
    pub fn sorted_counters(&self) -> Vec<(&str, i64)> {
        let mut out: Vec<(&str, i64)> = self.counters.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        out.sort_unstable_by(|a, b| a.0.cmp(b.0));
        out
    }

    /// Gauges sorted by id, for deterministic output.
    pub fn sorted_gauges(&self) -> Vec<(&str, f64)> {
        let mut out: Vec<(&str, f64)> = self.gauges.iter().map(|(k, v)| (k.as_str(), *v)).collect();
        out.sort_unstable_by(|a, b| a.0.cmp(b.0));
        out
    }
}

/// Result of a restore: the data that could be read plus the number of
/// records that were skipped as malformed.
#[derive(Debug, Default)]
pub struct Restored {
    pub snapshot: Snapshot,
    pub skipped: usize,
}

impl Restored {
    /// Non-fatal error describing skipped records, if any.
    pub fn warning(&self) -> Option<error::StorageError> {
        (self.skipped > 0).then_some(error::StorageError::Malformed {
            skipped: self.skipped,
        })
    }
}

/// Durable backend for store snapshots.
///
/// Implementations must be `Send + Sync`: the snapshot ticker, the ingest
/// path (in synchronous mode) and the health endpoint share one instance.
#[async_trait]
pub trait Persister: Send + Sync {
    /// Short backend name for logs (`"file"`, `"database"`).
    fn name(&self) -> &'static str;

    /// Replaces the persisted state with `snapshot`.
    async fn save(&self, snapshot: &Snapshot) -> Result<()>;

    /// Reads back the last saved state.
    async fn restore(&self) -> Result<Restored>;

    /// Health probe. `Ok` means the backend is reachable.
    async fn check(&self) -> Result<()>;

    /// Releases the backend's resources.
    async fn close(&self) -> Result<()>;
}

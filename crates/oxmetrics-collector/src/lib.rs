//! Metric collection for the oxmetrics agent.
//!
//! Each [`Collector`] reads one group of gauges. The agent polls the
//! [`runtime::RuntimeCollector`] and the [`host::HostCollector`] from two
//! independent tasks, both ticking on its poll interval. Only the runtime
//! poll counts towards `PollCount`.

pub mod host;
pub mod runtime;

use anyhow::Result;
use oxmetrics_common::types::Metric;

/// A source of gauges sampled on the agent host.
///
/// `collect` takes `&mut self` because the underlying `sysinfo` handles
/// keep state between refreshes (CPU usage is a delta between two reads).
pub trait Collector: Send + Sync {
    /// Short name for logs (`"runtime"`, `"host"`).
    fn name(&self) -> &str;

    /// Reads the current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Metric>>;
}

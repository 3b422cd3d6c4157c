use crate::Collector;
use anyhow::Result;
use oxmetrics_common::types::Metric;
use sysinfo::System;

/// Host-wide memory totals and per-core CPU utilization
/// (`CPUutilization1` .. `CPUutilizationN`).
pub struct HostCollector {
    system: System,
}

impl HostCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for HostCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for HostCollector {
    fn name(&self) -> &str {
        "host"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_usage();

        let mut metrics = Vec::with_capacity(2 + self.system.cpus().len());
        metrics.push(Metric::gauge("TotalMemory", self.system.total_memory() as f64));
        metrics.push(Metric::gauge("FreeMemory", self.system.free_memory() as f64));
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            metrics.push(Metric::gauge(
                format!("CPUutilization{}", i + 1),
                f64::from(cpu.cpu_usage()),
            ));
        }
        Ok(metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxmetrics_common::types::MetricValue;

    #[test]
    fn memory_and_cpu_gauges() {
        let mut collector = HostCollector::new();
        let metrics = collector.collect().unwrap();

        assert_eq!(metrics[0].id, "TotalMemory");
        assert_eq!(metrics[1].id, "FreeMemory");
        assert!(metrics.iter().any(|m| m.id == "CPUutilization1"));
        match metrics[0].value {
            MetricValue::Gauge(total) => assert!(total > 0.0),
            MetricValue::Counter(_) => panic!("TotalMemory must be a gauge"),
        }
    }
}

use crate::Collector;
use anyhow::{anyhow, Result};
use oxmetrics_common::types::Metric;
use sysinfo::{Pid, ProcessesToUpdate, System};

/// Gauges describing the agent process and the memory it runs in.
pub const RUNTIME_GAUGES: [&str; 14] = [
    "ResidentMemory",
    "VirtualMemory",
    "ProcessCPU",
    "DiskReadBytes",
    "DiskWrittenBytes",
    "Uptime",
    "UsedMemory",
    "AvailableMemory",
    "UsedSwap",
    "TotalSwap",
    "LoadAverage1",
    "LoadAverage5",
    "LoadAverage15",
    "NumCPU",
];

pub struct RuntimeCollector {
    system: System,
    pid: Pid,
}

impl RuntimeCollector {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("current pid: {e}"))?;
        let mut system = System::new();
        system.refresh_cpu_all();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        Ok(Self { system, pid })
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Metric>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), true);

        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow!("process {} not found", self.pid))?;
        let disk = process.disk_usage();
        let load = System::load_average();

        Ok(vec![
            Metric::gauge("ResidentMemory", process.memory() as f64),
            Metric::gauge("VirtualMemory", process.virtual_memory() as f64),
            Metric::gauge("ProcessCPU", f64::from(process.cpu_usage())),
            Metric::gauge("DiskReadBytes", disk.total_read_bytes as f64),
            Metric::gauge("DiskWrittenBytes", disk.total_written_bytes as f64),
            Metric::gauge("Uptime", process.run_time() as f64),
            Metric::gauge("UsedMemory", self.system.used_memory() as f64),
            Metric::gauge("AvailableMemory", self.system.available_memory() as f64),
            Metric::gauge("UsedSwap", self.system.used_swap() as f64),
            Metric::gauge("TotalSwap", self.system.total_swap() as f64),
            Metric::gauge("LoadAverage1", load.one),
            Metric::gauge("LoadAverage5", load.five),
            Metric::gauge("LoadAverage15", load.fifteen),
            Metric::gauge("NumCPU", self.system.cpus().len() as f64),
        ])
    }
}

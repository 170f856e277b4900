use crate::{Collector, Sample};
use anyhow::Result;
use sysinfo::System;

/// Host memory totals and per-core CPU utilization.
///
/// Core gauges are named `CPUutilization0`, `CPUutilization1`, and so on.
pub struct SystemCollector {
    system: System,
}

impl SystemCollector {
    pub fn new() -> Self {
        let mut system = System::new();
        system.refresh_cpu_all();
        Self { system }
    }
}

impl Default for SystemCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for SystemCollector {
    fn name(&self) -> &str {
        "system"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        self.system.refresh_memory();
        self.system.refresh_cpu_all();

        let mut samples = vec![
            Sample::gauge("TotalMemory", self.system.total_memory() as f64),
            Sample::gauge("FreeMemory", self.system.free_memory() as f64),
        ];
        for (i, cpu) in self.system.cpus().iter().enumerate() {
            samples.push(Sample::gauge(
                format!("CPUutilization{i}"),
                cpu.cpu_usage() as f64,
            ));
        }
        Ok(samples)
    }
}

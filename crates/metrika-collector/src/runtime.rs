use crate::{Collector, Sample};
use anyhow::{anyhow, Result};
use rand::Rng;
use sysinfo::{Pid, ProcessesToUpdate, System};

pub const POLL_COUNT: &str = "PollCount";
pub const RANDOM_VALUE: &str = "RandomValue";

/// Runtime memory gauge names reported on every poll. Heap and system sizes
/// come from the agent process; GC and allocator internals that have no
/// process-level counterpart are reported as 0.
pub const RUNTIME_GAUGES: [&str; 27] = [
    "Alloc",
    "BuckHashSys",
    "Frees",
    "GCCPUFraction",
    "GCSys",
    "HeapAlloc",
    "HeapIdle",
    "HeapInuse",
    "HeapObjects",
    "HeapReleased",
    "HeapSys",
    "LastGC",
    "Lookups",
    "MCacheInuse",
    "MCacheSys",
    "MSpanInuse",
    "MSpanSys",
    "Mallocs",
    "NextGC",
    "NumForcedGC",
    "NumGC",
    "OtherSys",
    "PauseTotalNs",
    "StackInuse",
    "StackSys",
    "Sys",
    "TotalAlloc",
];

/// Samples the agent's own memory footprint, one random gauge and a poll
/// counter increment.
pub struct RuntimeCollector {
    system: System,
    pid: Pid,
    last_resident: u64,
    total_alloc: u64,
}

impl RuntimeCollector {
    pub fn new() -> Result<Self> {
        let pid = sysinfo::get_current_pid().map_err(|e| anyhow!("current pid unavailable: {e}"))?;
        Ok(Self {
            system: System::new(),
            pid,
            last_resident: 0,
            total_alloc: 0,
        })
    }

    fn process_memory(&mut self) -> Result<(u64, u64)> {
        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[self.pid]), false);
        let process = self
            .system
            .process(self.pid)
            .ok_or_else(|| anyhow!("process {} not found", self.pid))?;
        Ok((process.memory(), process.virtual_memory()))
    }
}

impl Collector for RuntimeCollector {
    fn name(&self) -> &str {
        "runtime"
    }

    fn collect(&mut self) -> Result<Vec<Sample>> {
        let (resident, virt) = self.process_memory()?;

        // Cumulative growth of the resident set, so it only ever increases.
        self.total_alloc += resident.saturating_sub(self.last_resident);
        self.last_resident = resident;

        let value_of = |name: &str| -> f64 {
            match name {
                "Alloc" | "HeapAlloc" | "HeapInuse" => resident as f64,
                "Sys" | "HeapSys" => virt as f64,
                "HeapIdle" => virt.saturating_sub(resident) as f64,
                "TotalAlloc" => self.total_alloc as f64,
                _ => 0.0,
            }
        };

        let mut samples: Vec<Sample> = RUNTIME_GAUGES
            .iter()
            .map(|name| Sample::gauge(*name, value_of(name)))
            .collect();
        samples.push(Sample::gauge(RANDOM_VALUE, rand::thread_rng().gen::<f64>()));
        samples.push(Sample::counter(POLL_COUNT, 1));
        Ok(samples)
    }
}

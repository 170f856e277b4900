use metrika_collector::Sample;
use metrika_common::types::Snapshot;
use std::sync::{Mutex, MutexGuard};

/// The agent's local accumulator, written by the poll loop and read on
/// every report tick.
#[derive(Debug, Default)]
pub struct LocalStore {
    metrics: Mutex<Snapshot>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Snapshot> {
        self.metrics
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn apply(&self, samples: &[Sample]) {
        let mut metrics = self.lock();
        for sample in samples {
            match sample {
                Sample::Gauge { name, value } => {
                    metrics.apply_gauge(name, *value);
                }
                Sample::Counter { name, delta } => {
                    metrics.apply_counter(name, *delta);
                }
            }
        }
    }

    /// Snapshot for one report cycle. Gauges stay in place; counters are
    /// handed over and reset, so each report carries only the increments
    /// since the previous one.
    pub fn take_report(&self) -> Snapshot {
        let mut metrics = self.lock();
        Snapshot {
            gauge: metrics.gauge.clone(),
            counter: std::mem::take(&mut metrics.counter),
        }
    }

    pub fn to_snapshot(&self) -> Snapshot {
        self.lock().clone()
    }
}

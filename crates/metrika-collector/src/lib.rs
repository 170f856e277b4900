//! Metric samplers for the metrika agent.
//!
//! Each [`Collector`] gathers one category of values (process runtime
//! memory, host memory and CPU) and returns them as [`Sample`]s that the
//! agent folds into its local store on every poll tick.

pub mod runtime;
pub mod system;

use anyhow::Result;

/// One sampled value. Gauges replace the stored value, counters add to it.
#[derive(Debug, Clone, PartialEq)]
pub enum Sample {
    Gauge { name: String, value: f64 },
    Counter { name: String, delta: i64 },
}

impl Sample {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Sample::Gauge {
            name: name.into(),
            value,
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Sample::Counter {
            name: name.into(),
            delta,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Sample::Gauge { name, .. } | Sample::Counter { name, .. } => name,
        }
    }
}

/// A sampler run by the agent's poll loop.
///
/// `Send` so the boxed collectors can live inside the spawned scheduler task.
pub trait Collector: Send {
    /// Returns the collector name (e.g., `"runtime"`, `"system"`), used for logging.
    fn name(&self) -> &str;

    /// Samples current values.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying system API call fails.
    fn collect(&mut self) -> Result<Vec<Sample>>;
}

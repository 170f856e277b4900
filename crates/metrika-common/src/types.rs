use crate::error::MetricError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The two metric kinds understood by the agent and the server.
///
/// # Examples
///
/// ```
/// use metrika_common::types::MetricKind;
///
/// let kind: MetricKind = "counter".parse().unwrap();
/// assert_eq!(kind, MetricKind::Counter);
/// assert_eq!(MetricKind::Gauge.to_string(), "gauge");
/// assert!("Gauge".parse::<MetricKind>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    Counter,
    Gauge,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MetricKind {
    type Err = MetricError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(MetricKind::Counter),
            "gauge" => Ok(MetricKind::Gauge),
            _ => Err(MetricError::UnknownType),
        }
    }
}

/// JSON wire record exchanged by `/update`, `/updates` and `/value`.
///
/// `mtype` stays a raw string so that records with an unknown type still
/// deserialize and can be rejected (or skipped in a batch) individually.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub id: String,
    #[serde(rename = "type")]
    pub mtype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl Metrics {
    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Counter.to_string(),
            delta: Some(delta),
            value: None,
        }
    }

    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            mtype: MetricKind::Gauge.to_string(),
            delta: None,
            value: Some(value),
        }
    }

    pub fn kind(&self) -> Result<MetricKind, MetricError> {
        self.mtype.parse()
    }

    /// Validates the record as an update.
    ///
    /// The payload field must match the declared type: a counter needs
    /// `delta`, a gauge needs a finite `value`.
    pub fn to_update(&self) -> Result<MetricUpdate, MetricError> {
        let kind = self.kind()?;
        if self.id.is_empty() {
            return Err(MetricError::MissingName);
        }
        match kind {
            MetricKind::Counter => {
                let delta = self.delta.ok_or(MetricError::CounterValue)?;
                Ok(MetricUpdate::Counter {
                    name: self.id.clone(),
                    delta,
                })
            }
            MetricKind::Gauge => {
                let value = self
                    .value
                    .filter(|v| v.is_finite())
                    .ok_or(MetricError::GaugeValue)?;
                Ok(MetricUpdate::Gauge {
                    name: self.id.clone(),
                    value,
                })
            }
        }
    }
}

/// A validated update, ready to be applied to a store.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricUpdate {
    Counter { name: String, delta: i64 },
    Gauge { name: String, value: f64 },
}

impl MetricUpdate {
    /// Parses the path-encoded form `/update/{type}/{name}/{value}`.
    ///
    /// # Examples
    ///
    /// ```
    /// use metrika_common::error::MetricError;
    /// use metrika_common::types::MetricUpdate;
    ///
    /// let update = MetricUpdate::parse("counter", "PollCount", "3").unwrap();
    /// assert_eq!(update, MetricUpdate::Counter { name: "PollCount".into(), delta: 3 });
    /// assert_eq!(MetricUpdate::parse("gauge", "Alloc", "abc"), Err(MetricError::GaugeValue));
    /// assert_eq!(MetricUpdate::parse("bogus", "x", "1"), Err(MetricError::UnknownType));
    /// ```
    pub fn parse(kind: &str, name: &str, raw: &str) -> Result<Self, MetricError> {
        let kind: MetricKind = kind.parse()?;
        if name.is_empty() {
            return Err(MetricError::MissingName);
        }
        if raw.is_empty() {
            return Err(MetricError::MissingValue);
        }
        match kind {
            MetricKind::Counter => {
                let delta = raw.parse::<i64>().map_err(|_| MetricError::CounterValue)?;
                Ok(MetricUpdate::Counter {
                    name: name.to_string(),
                    delta,
                })
            }
            MetricKind::Gauge => {
                let value = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or(MetricError::GaugeValue)?;
                Ok(MetricUpdate::Gauge {
                    name: name.to_string(),
                    value,
                })
            }
        }
    }

    pub fn name(&self) -> &str {
        match self {
            MetricUpdate::Counter { name, .. } | MetricUpdate::Gauge { name, .. } => name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            MetricUpdate::Counter { .. } => MetricKind::Counter,
            MetricUpdate::Gauge { .. } => MetricKind::Gauge,
        }
    }
}

/// Full contents of a metric store: latest gauges and running counter totals.
///
/// This is also the on-disk checkpoint format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub gauge: BTreeMap<String, f64>,
    #[serde(default)]
    pub counter: BTreeMap<String, i64>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.gauge.len() + self.counter.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gauge.is_empty() && self.counter.is_empty()
    }

    /// Adds `delta` to a counter with two's-complement wrap on overflow and
    /// returns the new total.
    pub fn apply_counter(&mut self, name: &str, delta: i64) -> i64 {
        let total = self.counter.entry(name.to_string()).or_insert(0);
        *total = total.wrapping_add(delta);
        *total
    }

    pub fn apply_gauge(&mut self, name: &str, value: f64) -> f64 {
        self.gauge.insert(name.to_string(), value);
        value
    }

    /// One wire record per metric, gauges first.
    pub fn to_metrics(&self) -> Vec<Metrics> {
        let gauges = self.gauge.iter().map(|(k, v)| Metrics::gauge(k, *v));
        let counters = self.counter.iter().map(|(k, v)| Metrics::counter(k, *v));
        gauges.chain(counters).collect()
    }
}

/// Plain-text rendering of a gauge for `GET /value/gauge/{name}`.
///
/// ```
/// assert_eq!(metrika_common::types::format_gauge(2.0), "2");
/// assert_eq!(metrika_common::types::format_gauge(0.125), "0.125");
/// assert_eq!(metrika_common::types::format_gauge(1234567.0), "1234567");
/// ```
pub fn format_gauge(value: f64) -> String {
    value.to_string()
}

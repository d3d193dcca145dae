//! One flat reading of machine state.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How a raw value relates to time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Instantaneous reading, averaged as-is.
    Gauge,
    /// Monotonic total since boot, converted to a per-second rate before averaging.
    Counter,
}

/// A single raw metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub value: f64,
    pub kind: MetricKind,
}

/// Metric name to raw value, as produced by a [`MetricProbe`](crate::MetricProbe).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    samples: BTreeMap<String, Sample>,
}

impl Snapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an instantaneous value. Non-finite values are dropped.
    pub fn gauge(&mut self, name: impl Into<String>, value: f64) {
        self.push(name.into(), value, MetricKind::Gauge);
    }

    /// Record a cumulative counter. Non-finite values are dropped.
    pub fn counter(&mut self, name: impl Into<String>, value: f64) {
        self.push(name.into(), value, MetricKind::Counter);
    }

    fn push(&mut self, name: String, value: f64, kind: MetricKind) {
        if !value.is_finite() {
            return;
        }
        self.samples.insert(name, Sample { value, kind });
    }

    pub fn get(&self, name: &str) -> Option<&Sample> {
        self.samples.get(name)
    }

    pub fn value(&self, name: &str) -> Option<f64> {
        self.samples.get(name).map(|s| s.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.samples.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Sample)> {
        self.samples.iter().map(|(k, v)| (k.as_str(), v))
    }
}

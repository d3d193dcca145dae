//! Running sums between report boundaries, and counter-to-rate conversion.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::snapshot::{MetricKind, Snapshot};

/// Raw cumulative readings from the last successful fold.
#[derive(Debug, Clone)]
pub struct PreviousSnapshot {
    counters: HashMap<String, f64>,
    taken_at: Instant,
}

impl PreviousSnapshot {
    /// Empty baseline anchored at `taken_at`.
    pub fn new(taken_at: Instant) -> Self {
        Self {
            counters: HashMap::new(),
            taken_at,
        }
    }

    pub fn taken_at(&self) -> Instant {
        self.taken_at
    }

    pub fn counter(&self, name: &str) -> Option<f64> {
        self.counters.get(name).copied()
    }
}

/// Per-metric running sum plus the number of folds since the last drain.
#[derive(Debug, Clone, Default)]
pub struct RunningAccumulator {
    sums: BTreeMap<String, f64>,
    folds: u64,
}

impl RunningAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fold_count(&self) -> u64 {
        self.folds
    }

    pub fn sum(&self, name: &str) -> Option<f64> {
        self.sums.get(name).copied()
    }

    /// Add one snapshot. Counters are converted to per-second rates against
    /// `previous`, which then becomes this snapshot's raw readings.
    pub fn fold(&mut self, snapshot: &Snapshot, previous: &mut PreviousSnapshot, now: Instant) {
        let elapsed = now.saturating_duration_since(previous.taken_at).as_secs_f64();
        let mut counters = HashMap::new();

        for (name, sample) in snapshot.iter() {
            let value = match sample.kind {
                MetricKind::Gauge => sample.value,
                MetricKind::Counter => {
                    counters.insert(name.to_string(), sample.value);
                    // First sighting of a counter is its own baseline.
                    let before = previous.counter(name).unwrap_or(sample.value);
                    if elapsed > 0.0 {
                        (sample.value - before) / elapsed
                    } else {
                        0.0
                    }
                }
            };
            *self.sums.entry(name.to_string()).or_insert(0.0) += value;
        }
        self.folds += 1;

        previous.counters = counters;
        previous.taken_at = now;
    }

    /// Mean of every metric over the folds so far, or `None` when nothing
    /// was folded.
    pub fn averages(&self) -> Option<BTreeMap<String, f64>> {
        if self.folds == 0 {
            return None;
        }
        let n = self.folds as f64;
        Some(
            self.sums
                .iter()
                .map(|(k, v)| (k.clone(), v / n))
                .collect(),
        )
    }

    /// Forget all sums and the fold count.
    pub fn reset(&mut self) {
        self.sums.clear();
        self.folds = 0;
    }
}

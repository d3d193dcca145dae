//! Mapping report boundaries onto the work process's iteration axis.
//!
//! The work process advances its counter at its own, uneven pace, and may
//! never report one at all. At every boundary this picks the iteration the
//! window's averages are filed under:
//!
//! - if the counter moved, its new value;
//! - if it stalled, an extrapolation from the last observed step, damped so
//!   it stays below the value the work process will report next;
//! - if no counter shows up within the grace period, whole seconds since
//!   the daemon started.

use std::time::Duration;

use crate::sink::IterationSource;

/// Damping applied when extrapolating a stalled counter.
pub const STALL_DAMPING: f64 = 0.95;

/// Which axis reported iterations come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackMode {
    /// Undecided: nothing is emitted yet.
    #[default]
    Unknown,
    /// No external counter; seconds since start are the iteration.
    Seconds,
    /// The work process's counter is the iteration.
    External,
}

/// Last observed step of the external counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationInterval {
    /// Iterations advanced.
    pub delta: i64,
    /// Seconds-since-start elapsed while advancing them.
    pub seconds: i64,
}

/// A change of [`FallbackMode`] made at a boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeTransition {
    /// The external counter was confirmed.
    External,
    /// The grace period ran out; seconds are used from now on.
    Seconds,
}

/// Outcome of one boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Iteration to report at, `None` while the mode is still unknown.
    pub iteration: Option<i64>,
    pub transition: Option<ModeTransition>,
}

/// Reconciliation state kept for the daemon's lifetime.
#[derive(Debug, Clone, Default)]
pub struct IterationState {
    seconds_since_start: i64,
    last_iteration: i64,
    last_iteration_timestamp: i64,
    last_interval: Option<IterationInterval>,
    repeated_count: u32,
    mode: FallbackMode,
}

impl IterationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> FallbackMode {
        self.mode
    }

    pub fn seconds_since_start(&self) -> i64 {
        self.seconds_since_start
    }

    pub fn last_iteration(&self) -> i64 {
        self.last_iteration
    }

    pub fn last_interval(&self) -> Option<IterationInterval> {
        self.last_interval
    }

    pub fn repeated_count(&self) -> u32 {
        self.repeated_count
    }

    /// Advance the seconds clock by `elapsed` (rounded) and pick the
    /// iteration for this boundary.
    pub fn resolve(
        &mut self,
        elapsed: Duration,
        source: &dyn IterationSource,
        grace_sec: f64,
    ) -> Resolution {
        self.seconds_since_start += elapsed.as_secs_f64().round() as i64;
        let mut transition = None;

        if self.mode == FallbackMode::Unknown {
            if source.reports_iterations() {
                self.mode = FallbackMode::External;
                transition = Some(ModeTransition::External);
            } else if self.seconds_since_start as f64 >= grace_sec {
                self.mode = FallbackMode::Seconds;
                transition = Some(ModeTransition::Seconds);
            }
        }

        if self.mode == FallbackMode::Seconds {
            return Resolution {
                iteration: Some(self.seconds_since_start),
                transition,
            };
        }

        let current = source.last_iteration();
        let iteration = if current == self.last_iteration {
            self.repeated_count += 1;
            current + self.stalled_advance()
        } else {
            let delta = current - self.last_iteration;
            let seconds = self.seconds_since_start - self.last_iteration_timestamp;
            // A counter that went backwards (restarted work process) gives no
            // usable step to extrapolate from.
            self.last_interval = (delta > 0).then_some(IterationInterval { delta, seconds });
            self.last_iteration_timestamp = self.seconds_since_start;
            self.last_iteration = current;
            self.repeated_count = 0;
            if self.mode == FallbackMode::Unknown {
                self.mode = FallbackMode::External;
                transition = Some(ModeTransition::External);
            }
            current
        };

        Resolution {
            iteration: (self.mode != FallbackMode::Unknown).then_some(iteration),
            transition,
        }
    }

    /// Iterations to add to a stalled counter.
    fn stalled_advance(&self) -> i64 {
        let Some(interval) = self.last_interval.filter(|i| i.seconds > 0) else {
            return 1;
        };
        let since = (self.seconds_since_start - self.last_iteration_timestamp) as f64;
        let estimate =
            (STALL_DAMPING * interval.delta as f64 * since / interval.seconds as f64) as i64;
        estimate.clamp(0, interval.delta - 1)
    }
}

//! # resmon-core
//!
//! **Machine utilization, filed under your training loop's iterations.**
//!
//! `resmon-core` samples host (and optionally GPU) utilization at a high
//! rate in a background thread, averages the samples over a reporting window
//! and emits one scalar per metric against the iteration counter of a
//! concurrently running work process.
//!
//! ## Quick Start
//!
//! ```no_run
//! use resmon_core::{JsonLinesSink, MonitorConfig, NoIterations, ResourceMonitor};
//!
//! let monitor = ResourceMonitor::new(
//!     MonitorConfig::default(),
//!     Box::new(JsonLinesSink::new(std::io::stdout())),
//!     Box::new(NoIterations),
//! )
//! .expect("default config is valid");
//!
//! let handle = monitor.start().expect("spawn daemon thread");
//! // ... run the workload ...
//! handle.stop();
//! ```
//!
//! ## Architecture
//!
//! Probe → fold (counters become rates) → running sums → report boundary →
//! iteration reconciliation → sink
//!
//! Cumulative counters (network and disk bytes) are diffed against the raw
//! values of the previous successful fold. At each boundary the iteration is
//! the work process's counter when it moves, a damped extrapolation when it
//! stalls, or seconds since start when no counter ever shows up.

pub mod accelerator;
pub mod accumulator;
pub mod config;
pub mod error;
pub mod host;
pub mod iteration;
pub mod monitor;
pub mod sink;
pub mod snapshot;

pub use accelerator::{
    ACCELERATOR_FAILURE_LIMIT, Accelerator, AcceleratorGate, AcceleratorHealth,
    AcceleratorStatus, DeviceReading, NvidiaSmi,
};
pub use accumulator::{PreviousSnapshot, RunningAccumulator};
pub use config::MonitorConfig;
pub use error::{ConfigError, ProbeError, SinkError};
pub use host::{HostProbe, MetricProbe};
pub use iteration::{
    FallbackMode, IterationInterval, IterationState, ModeTransition, Resolution, STALL_DAMPING,
};
pub use monitor::{MonitorHandle, ResourceMonitor};
pub use sink::{
    Console, FileIterationSource, IterationSource, JsonLinesSink, LogConsole, LogSink,
    MetricsSink, NoIterations, TITLE_GPU, TITLE_MACHINE, title_for,
};
pub use snapshot::{MetricKind, Sample, Snapshot};

/// Library version (from Cargo.toml).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! The sampling daemon.
//!
//! One background thread runs a single loop. Every `1 / sample_frequency`
//! seconds it folds a snapshot into the running sums. Once the current
//! reporting window has elapsed it averages them, resolves the iteration
//! and emits one scalar per metric. The window is measured from the end of
//! the previous report, so the cadence drifts slightly instead of aligning
//! to the wall clock.
//!
//! Nothing in here fails the loop: provider and sink errors are logged and
//! dropped. Only cancellation ends it, without a final partial report.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::accelerator::{Accelerator, AcceleratorGate, AcceleratorStatus};
use crate::accumulator::{PreviousSnapshot, RunningAccumulator};
use crate::config::MonitorConfig;
use crate::error::ConfigError;
use crate::host::{HostProbe, MetricProbe};
use crate::iteration::{IterationState, ModeTransition};
use crate::sink::{Console, IterationSource, LogConsole, MetricsSink, title_for};

const MSG_GPU_UNAVAILABLE: &str = "resmon: GPU monitoring is not available";
const MSG_FALLBACK_SECONDS: &str =
    "resmon: could not detect iteration reporting, falling back to iterations as seconds-from-start";
const MSG_GPU_DISABLED: &str =
    "resmon: GPU monitoring failed getting GPU readings, switching off GPU monitoring";

/// Samples machine state and reports window averages against the work
/// process's iteration axis.
pub struct ResourceMonitor {
    config: MonitorConfig,
    probe: Box<dyn MetricProbe>,
    accelerator: AcceleratorGate,
    iteration_source: Box<dyn IterationSource>,
    sink: Box<dyn MetricsSink>,
    console: Box<dyn Console>,
    accumulator: RunningAccumulator,
    previous: PreviousSnapshot,
    iterations: IterationState,
}

impl ResourceMonitor {
    /// Host-only monitor with the default probe and a log console.
    pub fn new(
        config: MonitorConfig,
        sink: Box<dyn MetricsSink>,
        iteration_source: Box<dyn IterationSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            probe: Box::new(HostProbe::new()),
            accelerator: AcceleratorGate::new(None),
            iteration_source,
            sink,
            console: Box::new(LogConsole),
            accumulator: RunningAccumulator::new(),
            previous: PreviousSnapshot::new(Instant::now()),
            iterations: IterationState::new(),
        })
    }

    pub fn with_probe(mut self, probe: Box<dyn MetricProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_accelerator(mut self, accelerator: Option<Box<dyn Accelerator>>) -> Self {
        self.accelerator = AcceleratorGate::new(accelerator);
        self
    }

    pub fn with_console(mut self, console: Box<dyn Console>) -> Self {
        self.console = console;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn iteration_state(&self) -> &IterationState {
        &self.iterations
    }

    pub fn accumulator(&self) -> &RunningAccumulator {
        &self.accumulator
    }

    pub fn accelerator(&self) -> &AcceleratorGate {
        &self.accelerator
    }

    /// Launch the daemon thread. The returned handle cancels it; dropping
    /// the handle cancels it too.
    pub fn start(self) -> std::io::Result<MonitorHandle> {
        let (cancel, cancelled) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("resmon-daemon".to_string())
            .spawn(move || self.run(cancelled))?;
        Ok(MonitorHandle { cancel, thread })
    }

    /// Run the loop on the current thread until `cancel` fires or its
    /// sender is dropped.
    pub fn run(mut self, cancel: Receiver<()>) {
        if !self.accelerator.is_available() {
            self.console.write(MSG_GPU_UNAVAILABLE);
        }
        log::info!(
            "resource monitor started: {} samples/s, report every {}s (first after {}s)",
            self.config.sample_frequency_per_sec,
            self.config.report_frequency_sec,
            self.config.first_report_interval().as_secs_f64()
        );

        let sample_interval = self.config.sample_interval();
        let mut reported = 0u64;
        loop {
            let window_start = Instant::now();
            let window = if reported == 0 {
                self.config.first_report_interval()
            } else {
                self.config.report_interval()
            };
            while window_start.elapsed() < window {
                match cancel.recv_timeout(sample_interval) {
                    Err(RecvTimeoutError::Timeout) => self.sample(Instant::now()),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        log::info!("resource monitor stopped after {reported} reports");
                        return;
                    }
                }
            }
            reported += 1;
            self.report(window_start.elapsed());
        }
    }

    /// Take one snapshot at `now` and fold it into the running sums.
    ///
    /// A failed host read leaves the sums and the counter baseline untouched.
    pub fn sample(&mut self, now: Instant) {
        let mut snapshot = match self.probe.snapshot() {
            Ok(s) => s,
            Err(e) => {
                log::debug!("dropping sample: {e}");
                return;
            }
        };
        match self.accelerator.collect(&mut snapshot) {
            AcceleratorStatus::Failed(e) => log::debug!("accelerator query failed: {e}"),
            AcceleratorStatus::Disabled(e) => {
                log::debug!("accelerator query failed: {e}");
                self.console.write(MSG_GPU_DISABLED);
            }
            AcceleratorStatus::Inactive | AcceleratorStatus::Reported(_) => {}
        }
        self.accumulator.fold(&snapshot, &mut self.previous, now);
    }

    /// Close the current window, `elapsed` after the previous boundary.
    ///
    /// Returns the number of scalars the sink accepted. The running sums are
    /// cleared whatever happens.
    pub fn report(&mut self, elapsed: Duration) -> usize {
        let averages = self.accumulator.averages();
        let resolution = self.iterations.resolve(
            elapsed,
            &*self.iteration_source,
            self.config.wait_for_first_iteration_to_start_sec,
        );
        match resolution.transition {
            Some(ModeTransition::Seconds) => self.console.write(MSG_FALLBACK_SECONDS),
            Some(ModeTransition::External) => log::info!(
                "iteration reporting detected at iteration {}",
                self.iterations.last_iteration()
            ),
            None => {}
        }

        let mut emitted = 0;
        if let (Some(iteration), Some(averages)) = (resolution.iteration, averages) {
            for (name, value) in &averages {
                let value = (value * 1000.0).round() / 1000.0;
                match self
                    .sink
                    .report_scalar(title_for(name), name, iteration, value)
                {
                    Ok(()) => emitted += 1,
                    Err(e) => log::debug!("dropping scalar {name}@{iteration}: {e}"),
                }
            }
        }
        self.accumulator.reset();
        emitted
    }
}

/// Cancels a running [`ResourceMonitor`].
pub struct MonitorHandle {
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

impl MonitorHandle {
    /// Ask the daemon to exit at its next wait. Does not block.
    pub fn stop(&self) {
        let _ = self.cancel.send(());
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Stop the daemon and wait for its thread to exit.
    pub fn join(self) -> std::thread::Result<()> {
        self.stop();
        self.thread.join()
    }
}

//! Optional GPU readings with one-way degradation.
//!
//! The accelerator is injected at construction. When it is absent the daemon
//! runs host-only; when it keeps failing it is switched off for good.

use std::io::Read;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::error::ProbeError;
use crate::snapshot::Snapshot;

/// Consecutive failed queries after which accelerator monitoring stops.
pub const ACCELERATOR_FAILURE_LIMIT: u32 = 3;

/// One device's readings, memory in MiB as drivers report it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceReading {
    pub temperature_c: f64,
    pub utilization_pct: f64,
    pub memory_used_mib: f64,
    pub memory_total_mib: f64,
}

/// Per-device accelerator query.
pub trait Accelerator: Send {
    /// Read every visible device, in index order.
    fn query(&mut self) -> Result<Vec<DeviceReading>, ProbeError>;
}

/// Queries NVIDIA GPUs through `nvidia-smi`.
pub struct NvidiaSmi {
    program: String,
    timeout: Duration,
}

const NVIDIA_SMI_ARGS: &[&str] = &[
    "--query-gpu=temperature.gpu,utilization.gpu,memory.used,memory.total",
    "--format=csv,noheader,nounits",
];

impl NvidiaSmi {
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("nvidia-smi", timeout)
    }

    /// Use a different executable speaking the same CSV query format.
    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// `Some` when `nvidia-smi` is on `PATH` and answers a query.
    pub fn detect(timeout: Duration) -> Option<Self> {
        let mut smi = Self::new(timeout);
        match smi.query() {
            Ok(_) => Some(smi),
            Err(e) => {
                log::debug!("nvidia-smi unavailable: {e}");
                None
            }
        }
    }
}

impl Accelerator for NvidiaSmi {
    fn query(&mut self) -> Result<Vec<DeviceReading>, ProbeError> {
        let out = run_command(&self.program, NVIDIA_SMI_ARGS, self.timeout)?;
        parse_nvidia_smi_csv(&out)
    }
}

/// Run a command to completion, killing it once `timeout` has passed.
fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<String, ProbeError> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .map_err(|e| ProbeError::Command {
            command: cmd.to_string(),
            detail: e.to_string(),
        })?;

    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    return Err(ProbeError::Command {
                        command: cmd.to_string(),
                        detail: status.to_string(),
                    });
                }
                let mut out = Vec::new();
                if let Some(mut stdout) = child.stdout.take() {
                    stdout
                        .read_to_end(&mut out)
                        .map_err(|e| ProbeError::io(cmd, e))?;
                }
                return Ok(String::from_utf8_lossy(&out).into_owned());
            }
            Ok(None) => {
                if start.elapsed() >= timeout {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(ProbeError::Timeout {
                        command: cmd.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    });
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            Err(e) => return Err(ProbeError::io(cmd, e)),
        }
    }
}

fn parse_nvidia_smi_csv(raw: &str) -> Result<Vec<DeviceReading>, ProbeError> {
    let mut devices = Vec::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let cols: Vec<f64> = line
            .split(',')
            .map(|c| c.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .map_err(|_| ProbeError::parse("nvidia-smi output", line.to_string()))?;
        let [temperature_c, utilization_pct, memory_used_mib, memory_total_mib] = cols[..] else {
            return Err(ProbeError::parse("nvidia-smi output", line.to_string()));
        };
        devices.push(DeviceReading {
            temperature_c,
            utilization_pct,
            memory_used_mib,
            memory_total_mib,
        });
    }
    Ok(devices)
}

/// Consecutive-failure tracking for the accelerator query.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcceleratorHealth {
    consecutive_failures: u32,
    disabled: bool,
}

impl AcceleratorHealth {
    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Returns true on the failure that crosses the limit.
    fn record_failure(&mut self) -> bool {
        if self.disabled {
            return false;
        }
        self.consecutive_failures += 1;
        if self.consecutive_failures >= ACCELERATOR_FAILURE_LIMIT {
            self.disabled = true;
            return true;
        }
        false
    }
}

/// What happened on one accelerator read.
#[derive(Debug)]
pub enum AcceleratorStatus {
    /// No accelerator was injected, or it is disabled.
    Inactive,
    /// Device keys were written to the snapshot.
    Reported(usize),
    /// The query failed; monitoring continues.
    Failed(ProbeError),
    /// The query failed and monitoring is now off for good.
    Disabled(ProbeError),
}

/// Accelerator plus its health, owned by the sampler.
pub struct AcceleratorGate {
    accelerator: Option<Box<dyn Accelerator>>,
    health: AcceleratorHealth,
}

impl AcceleratorGate {
    pub fn new(accelerator: Option<Box<dyn Accelerator>>) -> Self {
        Self {
            accelerator,
            health: AcceleratorHealth::default(),
        }
    }

    pub fn is_available(&self) -> bool {
        self.accelerator.is_some()
    }

    pub fn is_active(&self) -> bool {
        self.accelerator.is_some() && !self.health.is_disabled()
    }

    pub fn health(&self) -> &AcceleratorHealth {
        &self.health
    }

    /// Query the accelerator, if active, and append `gpu_{i}_*` keys.
    pub fn collect(&mut self, out: &mut Snapshot) -> AcceleratorStatus {
        if self.health.is_disabled() {
            return AcceleratorStatus::Inactive;
        }
        let Some(accelerator) = self.accelerator.as_mut() else {
            return AcceleratorStatus::Inactive;
        };
        match accelerator.query() {
            Ok(devices) => {
                self.health.record_success();
                for (i, d) in devices.iter().enumerate() {
                    write_device(out, i, d);
                }
                AcceleratorStatus::Reported(devices.len())
            }
            Err(e) => {
                if self.health.record_failure() {
                    self.accelerator = None;
                    AcceleratorStatus::Disabled(e)
                } else {
                    AcceleratorStatus::Failed(e)
                }
            }
        }
    }
}

fn write_device(out: &mut Snapshot, index: usize, d: &DeviceReading) {
    out.gauge(format!("gpu_{index}_temperature"), d.temperature_c);
    out.gauge(format!("gpu_{index}_utilization"), d.utilization_pct);
    out.gauge(
        format!("gpu_{index}_mem_usage"),
        100.0 * d.memory_used_mib / d.memory_total_mib,
    );
    out.gauge(
        format!("gpu_{index}_mem_free_gb"),
        (d.memory_total_mib - d.memory_used_mib) / 1024.0,
    );
    out.gauge(format!("gpu_{index}_mem_used_gb"), d.memory_used_mib / 1024.0);
}

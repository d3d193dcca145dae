pub mod run;
pub mod snapshot;

use std::time::Duration;

use resmon_core::{Accelerator, MonitorConfig, NvidiaSmi};

/// Probe for `nvidia-smi` unless GPUs were switched off.
pub fn detect_accelerator(enabled: bool, config: &MonitorConfig) -> Option<Box<dyn Accelerator>> {
    if !enabled {
        return None;
    }
    NvidiaSmi::detect(config.accelerator_timeout())
        .map(|smi| Box::new(smi) as Box<dyn Accelerator>)
}

/// Apply command-line overrides on top of a loaded or default config.
pub fn apply_overrides(
    mut config: MonitorConfig,
    sample_hz: Option<f64>,
    report_sec: Option<f64>,
    first_report_sec: Option<f64>,
    wait_first_iteration_sec: Option<f64>,
) -> MonitorConfig {
    if let Some(v) = sample_hz {
        config.sample_frequency_per_sec = v;
    }
    if let Some(v) = report_sec {
        config.report_frequency_sec = v;
    }
    if let Some(v) = first_report_sec {
        config.first_report_sec = Some(v);
    }
    if let Some(v) = wait_first_iteration_sec {
        config.wait_for_first_iteration_to_start_sec = v;
    }
    config
}

/// Human-readable window length for the startup banner.
pub fn format_secs(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 1.0 {
        format!("{:.0}ms", secs * 1000.0)
    } else {
        format!("{secs:.1}s")
    }
}

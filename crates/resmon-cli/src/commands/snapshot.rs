//! `resmon snapshot`: print one raw reading of this machine.

use resmon_core::{AcceleratorGate, AcceleratorStatus, HostProbe, MetricProbe, MonitorConfig};

pub fn run(gpu: bool, disk_path: Option<&str>) {
    let mut probe = match disk_path {
        Some(path) => HostProbe::new().with_disk_path(path),
        None => HostProbe::new(),
    };

    let mut snapshot = match probe.snapshot() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let config = MonitorConfig::default();
    let mut gate = AcceleratorGate::new(super::detect_accelerator(gpu, &config));
    if gpu && !gate.is_available() {
        eprintln!("Warning: GPU monitoring is not available");
    }
    if let AcceleratorStatus::Failed(e) | AcceleratorStatus::Disabled(e) =
        gate.collect(&mut snapshot)
    {
        eprintln!("Warning: GPU query failed: {e}");
    }

    match serde_json::to_string_pretty(&snapshot) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            eprintln!("Error encoding snapshot: {e}");
            std::process::exit(1);
        }
    }
}

//! `resmon run`: run the monitor in the foreground.

use std::fs::OpenOptions;
use std::io::BufWriter;
use std::path::Path;
use std::sync::mpsc;

use resmon_core::{
    FileIterationSource, IterationSource, JsonLinesSink, LogSink, MetricsSink, MonitorConfig,
    NoIterations, ResourceMonitor,
};

/// Parsed `run` flags.
pub struct RunArgs {
    pub config: Option<String>,
    pub sample_hz: Option<f64>,
    pub report_sec: Option<f64>,
    pub first_report_sec: Option<f64>,
    pub wait_first_iteration_sec: Option<f64>,
    pub iteration_file: Option<String>,
    pub trust_iterations: bool,
    pub output: Option<String>,
    pub log_scalars: bool,
    pub no_gpu: bool,
}

pub fn run(args: RunArgs) {
    let base = match args.config.as_deref() {
        Some(path) => MonitorConfig::load(Path::new(path)).unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(2);
        }),
        None => MonitorConfig::default(),
    };
    let config = super::apply_overrides(
        base,
        args.sample_hz,
        args.report_sec,
        args.first_report_sec,
        args.wait_first_iteration_sec,
    );

    let sink: Box<dyn MetricsSink> = match args.output.as_deref() {
        _ if args.log_scalars => Box::new(LogSink),
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| {
                    eprintln!("Error opening {path}: {e}");
                    std::process::exit(1);
                });
            Box::new(JsonLinesSink::new(BufWriter::new(file)))
        }
        None => Box::new(JsonLinesSink::new(std::io::stdout())),
    };

    let iterations: Box<dyn IterationSource> = match args.iteration_file.as_deref() {
        Some(path) if args.trust_iterations => Box::new(FileIterationSource::new(path).trusted()),
        Some(path) => Box::new(FileIterationSource::new(path)),
        None => Box::new(NoIterations),
    };

    let accelerator = super::detect_accelerator(!args.no_gpu, &config);
    let gpu_label = if accelerator.is_some() {
        "nvidia-smi"
    } else {
        "off"
    };

    let monitor = ResourceMonitor::new(config.clone(), sink, iterations)
        .unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(2);
        })
        .with_accelerator(accelerator);

    // Scalars may go to stdout, so the banner goes to stderr.
    eprintln!("resmon v{}", resmon_core::VERSION);
    eprintln!("  Sampling:   {} Hz", config.sample_frequency_per_sec);
    eprintln!(
        "  Reports:    every {} (first after {})",
        super::format_secs(config.report_interval()),
        super::format_secs(config.first_report_interval())
    );
    eprintln!(
        "  Iterations: {}",
        args.iteration_file
            .as_deref()
            .unwrap_or("none (seconds-from-start after grace period)")
    );
    eprintln!("  GPU:        {gpu_label}");
    let output_label = if args.log_scalars {
        "log"
    } else {
        args.output.as_deref().unwrap_or("stdout")
    };
    eprintln!("  Output:     {output_label}");
    eprintln!();

    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })
    .expect("Error setting Ctrl+C handler");

    let handle = monitor.start().unwrap_or_else(|e| {
        eprintln!("Error starting monitor thread: {e}");
        std::process::exit(1);
    });

    let _ = stop_rx.recv();
    log::info!("stopping; the current partial window is discarded");
    if handle.join().is_err() {
        eprintln!("Monitor thread panicked");
        std::process::exit(1);
    }
}

//! Interfaces to the monitored process, the metrics sink and the operator.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;

use crate::error::SinkError;

/// Series group for host metrics.
pub const TITLE_MACHINE: &str = ":monitor:machine";
/// Series group for accelerator metrics (keys prefixed `gpu_`).
pub const TITLE_GPU: &str = ":monitor:gpu";

/// Series group for a metric key.
pub fn title_for(metric: &str) -> &'static str {
    if metric.starts_with("gpu_") {
        TITLE_GPU
    } else {
        TITLE_MACHINE
    }
}

/// Receives one scalar per metric per report boundary.
///
/// Delivery is fire-and-forget: errors are logged and dropped by the caller.
/// Implementations must tolerate repeated or out-of-order iterations.
pub trait MetricsSink: Send {
    fn report_scalar(
        &mut self,
        title: &str,
        series: &str,
        iteration: i64,
        value: f64,
    ) -> Result<(), SinkError>;
}

/// The monitored work process's progress counter. Read-only from here.
pub trait IterationSource: Send {
    /// Most recent iteration the work process reached.
    fn last_iteration(&self) -> i64;

    /// True when the work process is known to report iterations through
    /// another channel, so the iteration axis can be trusted immediately.
    fn reports_iterations(&self) -> bool {
        false
    }
}

/// Operator-visible message channel.
pub trait Console: Send {
    fn write(&self, message: &str);
}

/// Console that forwards to the `log` facade at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogConsole;

impl Console for LogConsole {
    fn write(&self, message: &str) {
        log::warn!("{message}");
    }
}

/// A work process that never reports progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoIterations;

impl IterationSource for NoIterations {
    fn last_iteration(&self) -> i64 {
        0
    }
}

/// Iteration counter published by the work process as a text file.
///
/// The file holds a single integer. Unreadable or half-written contents read
/// as the last value that parsed.
pub struct FileIterationSource {
    path: PathBuf,
    reports_iterations: bool,
    last: Mutex<i64>,
}

impl FileIterationSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reports_iterations: false,
            last: Mutex::new(0),
        }
    }

    /// Trust the file as the iteration axis from the first boundary on.
    pub fn trusted(mut self) -> Self {
        self.reports_iterations = true;
        self
    }
}

impl IterationSource for FileIterationSource {
    fn last_iteration(&self) -> i64 {
        let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
        match std::fs::read_to_string(&self.path) {
            Ok(raw) => match raw.trim().parse::<i64>() {
                Ok(v) => *last = v,
                Err(_) => log::debug!("ignoring malformed iteration file {}", self.path.display()),
            },
            Err(e) => log::debug!("iteration file {} unreadable: {e}", self.path.display()),
        }
        *last
    }

    fn reports_iterations(&self) -> bool {
        self.reports_iterations
    }
}

#[derive(Serialize)]
struct ScalarRecord<'a> {
    title: &'a str,
    series: &'a str,
    iteration: i64,
    value: f64,
}

/// Writes one JSON object per scalar, newline-delimited.
pub struct JsonLinesSink<W: Write + Send> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> MetricsSink for JsonLinesSink<W> {
    fn report_scalar(
        &mut self,
        title: &str,
        series: &str,
        iteration: i64,
        value: f64,
    ) -> Result<(), SinkError> {
        let record = ScalarRecord {
            title,
            series,
            iteration,
            value,
        };
        serde_json::to_writer(&mut self.out, &record)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Logs every scalar at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl MetricsSink for LogSink {
    fn report_scalar(
        &mut self,
        title: &str,
        series: &str,
        iteration: i64,
        value: f64,
    ) -> Result<(), SinkError> {
        log::info!("{title}/{series} @{iteration} = {value}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gpu_prefix_selects_gpu_title() {
        assert_eq!(title_for("gpu_0_utilization"), TITLE_GPU);
        assert_eq!(title_for("cpu_usage"), TITLE_MACHINE);
        assert_eq!(title_for("network_gpu_like"), TITLE_MACHINE);
    }

    #[test]
    fn json_lines_one_object_per_scalar() {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.report_scalar(TITLE_MACHINE, "cpu_usage", 7, 12.345)
            .unwrap();
        sink.report_scalar(TITLE_GPU, "gpu_0_temperature", 8, 60.0)
            .unwrap();
        let text = String::from_utf8(sink.into_inner()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["title"], ":monitor:machine");
        assert_eq!(first["series"], "cpu_usage");
        assert_eq!(first["iteration"], 7);
        assert_eq!(first["value"], 12.345);
    }

    #[test]
    fn log_sink_accepts_every_scalar() {
        let mut sink = LogSink;
        assert!(sink.report_scalar(TITLE_MACHINE, "cpu_usage", 3, 1.5).is_ok());
        assert!(sink.report_scalar(TITLE_GPU, "gpu_0_utilization", -1, 0.0).is_ok());
    }

    #[test]
    fn file_iteration_source_keeps_last_good_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iteration");
        let source = FileIterationSource::new(&path);
        assert_eq!(source.last_iteration(), 0);
        assert!(!source.reports_iterations());

        std::fs::write(&path, "42\n").unwrap();
        assert_eq!(source.last_iteration(), 42);

        std::fs::write(&path, "4").unwrap();
        assert_eq!(source.last_iteration(), 4);

        std::fs::write(&path, "").unwrap();
        assert_eq!(source.last_iteration(), 4);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(source.last_iteration(), 4);
    }

    #[test]
    fn trusted_file_source_reports_iterations() {
        let source = FileIterationSource::new("/tmp/unused").trusted();
        assert!(source.reports_iterations());
        assert!(!NoIterations.reports_iterations());
    }
}

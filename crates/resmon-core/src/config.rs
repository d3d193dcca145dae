//! Daemon configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sampling and reporting cadence for a [`ResourceMonitor`](crate::ResourceMonitor).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Raw snapshots folded per second.
    pub sample_frequency_per_sec: f64,
    /// Seconds between report boundaries.
    pub report_frequency_sec: f64,
    /// Length of the first reporting window. `None` means `report_frequency_sec`.
    pub first_report_sec: Option<f64>,
    /// Elapsed seconds without an external iteration signal before falling
    /// back to seconds-from-start as the iteration axis.
    pub wait_for_first_iteration_to_start_sec: f64,
    /// Upper bound on a single accelerator query.
    pub accelerator_timeout_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_frequency_per_sec: 2.0,
            report_frequency_sec: 30.0,
            first_report_sec: None,
            wait_for_first_iteration_to_start_sec: 180.0,
            accelerator_timeout_ms: 2000,
        }
    }
}

impl MonitorConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject cadences the control loop cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("sample_frequency_per_sec", self.sample_frequency_per_sec)?;
        positive("report_frequency_sec", self.report_frequency_sec)?;
        if let Some(first) = self.first_report_sec {
            positive("first_report_sec", first)?;
        }
        representable(
            "sample_frequency_per_sec",
            self.sample_frequency_per_sec,
            1.0 / self.sample_frequency_per_sec,
        )?;
        representable(
            "report_frequency_sec",
            self.report_frequency_sec,
            self.report_frequency_sec,
        )?;
        if let Some(first) = self.first_report_sec {
            representable("first_report_sec", first, first)?;
        }
        let grace = self.wait_for_first_iteration_to_start_sec;
        if !grace.is_finite() || grace < 0.0 {
            return Err(ConfigError::Negative {
                field: "wait_for_first_iteration_to_start_sec",
                value: grace,
            });
        }
        Ok(())
    }

    // The accessors below assume `validate()` has passed.

    /// Wait between two sampler ticks.
    pub fn sample_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.sample_frequency_per_sec)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_secs_f64(self.report_frequency_sec)
    }

    /// Length of the first reporting window.
    pub fn first_report_interval(&self) -> Duration {
        Duration::from_secs_f64(self.first_report_sec.unwrap_or(self.report_frequency_sec))
    }

    pub fn accelerator_timeout(&self) -> Duration {
        Duration::from_millis(self.accelerator_timeout_ms)
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

/// `Duration::from_secs_f64` panics on overflow, so check the derived wait up front.
fn representable(field: &'static str, value: f64, secs: f64) -> Result<(), ConfigError> {
    match Duration::try_from_secs_f64(secs) {
        Ok(_) => Ok(()),
        Err(_) => Err(ConfigError::OutOfRange { field, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_cadence() {
        let c = MonitorConfig::default();
        assert_eq!(c.sample_frequency_per_sec, 2.0);
        assert_eq!(c.report_frequency_sec, 30.0);
        assert_eq!(c.first_report_sec, None);
        assert_eq!(c.wait_for_first_iteration_to_start_sec, 180.0);
        assert_eq!(c.sample_interval(), Duration::from_millis(500));
        assert!(c.validate().is_ok());
    }

    #[test]
    fn first_report_falls_back_to_report_frequency() {
        let mut c = MonitorConfig::default();
        assert_eq!(c.first_report_interval(), Duration::from_secs(30));
        c.first_report_sec = Some(5.0);
        assert_eq!(c.first_report_interval(), Duration::from_secs(5));
        assert_eq!(c.report_interval(), Duration::from_secs(30));
    }

    #[test]
    fn validate_rejects_bad_frequencies() {
        let c = MonitorConfig {
            sample_frequency_per_sec: 0.0,
            ..MonitorConfig::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigError::NotPositive {
                field: "sample_frequency_per_sec",
                ..
            })
        ));

        let c = MonitorConfig {
            report_frequency_sec: f64::NAN,
            ..MonitorConfig::default()
        };
        assert!(c.validate().is_err());

        let c = MonitorConfig {
            first_report_sec: Some(-1.0),
            ..MonitorConfig::default()
        };
        assert!(c.validate().is_err());

        let c = MonitorConfig {
            wait_for_first_iteration_to_start_sec: -0.5,
            ..MonitorConfig::default()
        };
        assert!(matches!(c.validate(), Err(ConfigError::Negative { .. })));
    }

    #[test]
    fn validate_rejects_intervals_that_overflow_duration() {
        let c = MonitorConfig {
            report_frequency_sec: 1e30,
            ..MonitorConfig::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigError::OutOfRange {
                field: "report_frequency_sec",
                ..
            })
        ));

        let c = MonitorConfig {
            sample_frequency_per_sec: 1e-30,
            ..MonitorConfig::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigError::OutOfRange {
                field: "sample_frequency_per_sec",
                ..
            })
        ));

        let c = MonitorConfig {
            first_report_sec: Some(1e30),
            ..MonitorConfig::default()
        };
        assert!(matches!(
            c.validate(),
            Err(ConfigError::OutOfRange {
                field: "first_report_sec",
                ..
            })
        ));

        // A week between reports is long but fine.
        let c = MonitorConfig {
            report_frequency_sec: 7.0 * 86_400.0,
            sample_frequency_per_sec: 0.5,
            ..MonitorConfig::default()
        };
        assert!(c.validate().is_ok());
        assert_eq!(c.sample_interval(), Duration::from_secs(2));
    }

    #[test]
    fn load_fills_missing_fields_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"report_frequency_sec": 10.0, "first_report_sec": 3.0}}"#).unwrap();
        let c = MonitorConfig::load(file.path()).unwrap();
        assert_eq!(c.report_frequency_sec, 10.0);
        assert_eq!(c.first_report_sec, Some(3.0));
        assert_eq!(c.sample_frequency_per_sec, 2.0);
    }

    #[test]
    fn load_reports_parse_and_validation_errors() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            MonitorConfig::load(file.path()),
            Err(ConfigError::Parse { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sample_frequency_per_sec": -2.0}}"#).unwrap();
        assert!(matches!(
            MonitorConfig::load(file.path()),
            Err(ConfigError::NotPositive { .. })
        ));

        let missing = Path::new("/nonexistent/resmon.json");
        assert!(matches!(
            MonitorConfig::load(missing),
            Err(ConfigError::Read { .. })
        ));
    }
}

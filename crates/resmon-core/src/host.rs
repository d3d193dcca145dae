//! Host metric provider backed by procfs, sysfs and `statvfs(2)`.
//!
//! Every read is best effort, but unlike a one-off report the daemon needs a
//! consistent key set per fold, so a failure in any mandatory reading fails
//! the whole snapshot. Core temperature is optional and simply absent when
//! the platform exposes no `coretemp` sensors.

use std::path::{Path, PathBuf};

use crate::error::ProbeError;
use crate::snapshot::Snapshot;

const BYTES_PER_MIB: f64 = 1024.0 * 1024.0;
const BYTES_PER_GIB: f64 = BYTES_PER_MIB * 1024.0;
#[cfg(target_os = "linux")]
const SECTOR_BYTES: f64 = 512.0;

/// Source of raw snapshots for the sampler.
pub trait MetricProbe: Send {
    /// Read the current machine state.
    fn snapshot(&mut self) -> Result<Snapshot, ProbeError>;
}

/// Busy/total jiffies of one logical core, tagged with its `cpuN` number.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct CoreTimes {
    cpu: usize,
    busy: f64,
    total: f64,
}

/// Reads CPU, memory, disk, temperature and cumulative I/O counters.
pub struct HostProbe {
    disk_path: PathBuf,
    hwmon_root: PathBuf,
    previous_cores: Vec<CoreTimes>,
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe {
    /// Probe reporting disk usage for the filesystem holding `$HOME`.
    pub fn new() -> Self {
        let disk_path = std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("/"));
        Self {
            disk_path,
            hwmon_root: PathBuf::from("/sys/class/hwmon"),
            previous_cores: Vec::new(),
        }
    }

    /// Report free space for the filesystem holding `path` instead.
    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = path.into();
        self
    }

    pub fn disk_path(&self) -> &Path {
        &self.disk_path
    }
}

impl MetricProbe for HostProbe {
    #[cfg(target_os = "linux")]
    fn snapshot(&mut self) -> Result<Snapshot, ProbeError> {
        let mut out = Snapshot::new();

        let stat = read_proc("/proc/stat")?;
        let cores = parse_core_times(&stat)?;
        out.gauge("cpu_usage", average_cpu_usage(&self.previous_cores, &cores));
        self.previous_cores = cores;

        let memory = parse_meminfo(&read_proc("/proc/meminfo")?)?;
        out.gauge("memory_used_gb", memory.used_bytes() / BYTES_PER_GIB);
        out.gauge("memory_free_gb", memory.available_bytes / BYTES_PER_GIB);

        out.gauge("disk_free_percent", disk_free_percent(&self.disk_path)?);

        if let Some(temp) = max_coretemp(&self.hwmon_root) {
            out.gauge("cpu_temperature", temp);
        }

        let (tx, rx) = parse_net_dev(&read_proc("/proc/net/dev")?)?;
        out.counter("network_tx_mbs", tx / BYTES_PER_MIB);
        out.counter("network_rx_mbs", rx / BYTES_PER_MIB);

        let (read, written) = parse_diskstats(&read_proc("/proc/diskstats")?);
        out.counter("io_read_mbs", read / BYTES_PER_MIB);
        out.counter("io_write_mbs", written / BYTES_PER_MIB);

        Ok(out)
    }

    #[cfg(not(target_os = "linux"))]
    fn snapshot(&mut self) -> Result<Snapshot, ProbeError> {
        Err(ProbeError::Unsupported {
            what: "host metrics",
        })
    }
}

#[cfg(target_os = "linux")]
fn read_proc(path: &str) -> Result<String, ProbeError> {
    std::fs::read_to_string(path).map_err(|e| ProbeError::io(path, e))
}

/// Per-core jiffies from `/proc/stat`, skipping the aggregate `cpu` line.
#[cfg(target_os = "linux")]
fn parse_core_times(raw: &str) -> Result<Vec<CoreTimes>, ProbeError> {
    let mut cores = Vec::new();
    for line in raw.lines() {
        let Some(rest) = line.strip_prefix("cpu") else {
            continue;
        };
        let mut tokens = rest.split_whitespace();
        // The aggregate line is plain `cpu`.
        let Some(cpu) = tokens.next().and_then(|n| n.parse::<usize>().ok()) else {
            continue;
        };
        let fields: Vec<f64> = tokens.filter_map(|s| s.parse::<f64>().ok()).collect();
        if fields.len() < 4 {
            return Err(ProbeError::parse("/proc/stat", line.to_string()));
        }
        // user nice system idle iowait irq softirq steal; guest time is
        // already counted in user/nice.
        let total: f64 = fields.iter().take(8).sum();
        let idle = fields[3] + fields.get(4).copied().unwrap_or(0.0);
        cores.push(CoreTimes {
            cpu,
            busy: total - idle,
            total,
        });
    }
    if cores.is_empty() {
        return Err(ProbeError::parse("/proc/stat", "no per-core cpu lines"));
    }
    Ok(cores)
}

/// Mean busy percentage across cores since the previous reading.
///
/// Cores are matched by number, since an offlined core drops out of
/// `/proc/stat` and shifts the ones after it. A core with no previous
/// reading is measured since boot.
#[cfg(target_os = "linux")]
fn average_cpu_usage(previous: &[CoreTimes], current: &[CoreTimes]) -> f64 {
    let usages: Vec<f64> = current
        .iter()
        .map(|cur| {
            let prev = previous
                .iter()
                .find(|p| p.cpu == cur.cpu)
                .copied()
                .unwrap_or_default();
            let total = cur.total - prev.total;
            let busy = cur.busy - prev.busy;
            if total <= 0.0 {
                0.0
            } else {
                (100.0 * busy / total).clamp(0.0, 100.0)
            }
        })
        .collect();
    usages.iter().sum::<f64>() / usages.len() as f64
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct MemoryInfo {
    total_bytes: f64,
    available_bytes: f64,
}

impl MemoryInfo {
    fn used_bytes(&self) -> f64 {
        (self.total_bytes - self.available_bytes).max(0.0)
    }
}

#[cfg(target_os = "linux")]
fn parse_meminfo(raw: &str) -> Result<MemoryInfo, ProbeError> {
    let mut total = None;
    let mut available = None;
    let mut free = None;
    for line in raw.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let Some(kib) = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<f64>().ok())
        else {
            continue;
        };
        match key {
            "MemTotal" => total = Some(kib * 1024.0),
            "MemAvailable" => available = Some(kib * 1024.0),
            "MemFree" => free = Some(kib * 1024.0),
            _ => {}
        }
    }
    // Kernels before 3.14 have no MemAvailable.
    match (total, available.or(free)) {
        (Some(total_bytes), Some(available_bytes)) => Ok(MemoryInfo {
            total_bytes,
            available_bytes,
        }),
        _ => Err(ProbeError::parse(
            "/proc/meminfo",
            "missing MemTotal or MemAvailable",
        )),
    }
}

/// Summed (tx, rx) bytes over every interface in `/proc/net/dev`.
#[cfg(target_os = "linux")]
fn parse_net_dev(raw: &str) -> Result<(f64, f64), ProbeError> {
    let mut tx = 0.0;
    let mut rx = 0.0;
    let mut seen = 0usize;
    for line in raw.lines().skip(2) {
        let Some((_, stats)) = line.split_once(':') else {
            continue;
        };
        let fields: Vec<f64> = stats
            .split_whitespace()
            .filter_map(|s| s.parse::<f64>().ok())
            .collect();
        if fields.len() < 16 {
            continue;
        }
        rx += fields[0];
        tx += fields[8];
        seen += 1;
    }
    if seen == 0 {
        return Err(ProbeError::parse("/proc/net/dev", "no interfaces"));
    }
    Ok((tx, rx))
}

#[cfg(target_os = "linux")]
fn is_whole_disk(name: &str) -> bool {
    if ["loop", "ram", "dm-", "md", "zram", "sr", "fd", "nbd"]
        .iter()
        .any(|p| name.starts_with(p))
    {
        return false;
    }
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        return !name.contains('p');
    }
    !name.chars().last().is_some_and(|c| c.is_ascii_digit())
}

/// Summed (read, written) bytes over whole physical disks.
#[cfg(target_os = "linux")]
fn parse_diskstats(raw: &str) -> (f64, f64) {
    let mut read = 0.0;
    let mut written = 0.0;
    for line in raw.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 14 || !is_whole_disk(parts[2]) {
            continue;
        }
        let sectors_read = parts[5].parse::<f64>().unwrap_or(0.0);
        let sectors_written = parts[9].parse::<f64>().unwrap_or(0.0);
        read += sectors_read * SECTOR_BYTES;
        written += sectors_written * SECTOR_BYTES;
    }
    (read, written)
}

/// Highest `coretemp` reading in degrees Celsius, if any sensor exists.
#[cfg(target_os = "linux")]
fn max_coretemp(hwmon_root: &Path) -> Option<f64> {
    let entries = std::fs::read_dir(hwmon_root).ok()?;
    let mut max: Option<f64> = None;
    for entry in entries.flatten() {
        let dir = entry.path();
        let is_coretemp = std::fs::read_to_string(dir.join("name"))
            .map(|n| n.trim() == "coretemp")
            .unwrap_or(false);
        if !is_coretemp {
            continue;
        }
        let Ok(files) = std::fs::read_dir(&dir) else {
            continue;
        };
        for file in files.flatten() {
            let fname = file.file_name();
            let fname = fname.to_string_lossy();
            if !(fname.starts_with("temp") && fname.ends_with("_input")) {
                continue;
            }
            let Some(milli) = std::fs::read_to_string(file.path())
                .ok()
                .and_then(|s| s.trim().parse::<f64>().ok())
            else {
                continue;
            };
            let celsius = milli / 1000.0;
            max = Some(max.map_or(celsius, |m: f64| m.max(celsius)));
        }
    }
    max
}

/// Free space percentage as `df` reports it: blocks available to
/// unprivileged users over used plus available.
#[cfg(unix)]
fn disk_free_percent(path: &Path) -> Result<f64, ProbeError> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| ProbeError::parse("disk path", e.to_string()))?;
    // SAFETY: `statvfs` is zero-initialisable plain data.
    let mut st: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: `c_path` is a valid NUL-terminated string and `st` is a valid
    // out-pointer for the duration of the call.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut st) };
    if rc != 0 {
        return Err(ProbeError::io(path, std::io::Error::last_os_error()));
    }
    let used = (st.f_blocks as f64 - st.f_bfree as f64) * st.f_frsize as f64;
    let avail = st.f_bavail as f64 * st.f_frsize as f64;
    Ok(free_percent(used, avail))
}

#[cfg(not(unix))]
fn disk_free_percent(_path: &Path) -> Result<f64, ProbeError> {
    Err(ProbeError::Unsupported { what: "statvfs" })
}

fn free_percent(used: f64, avail: f64) -> f64 {
    let total = used + avail;
    if total <= 0.0 {
        return 0.0;
    }
    100.0 - 100.0 * used / total
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_percent_matches_df_semantics() {
        assert!((free_percent(75.0, 25.0) - 25.0).abs() < 1e-9);
        assert_eq!(free_percent(0.0, 0.0), 0.0);
        assert!((free_percent(0.0, 10.0) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn memory_used_never_negative() {
        let m = MemoryInfo {
            total_bytes: 10.0,
            available_bytes: 12.0,
        };
        assert_eq!(m.used_bytes(), 0.0);
    }

    #[cfg(unix)]
    #[test]
    fn disk_free_percent_of_root_is_a_percentage() {
        let pct = disk_free_percent(Path::new("/")).unwrap();
        assert!((0.0..=100.0).contains(&pct));
    }

    #[cfg(unix)]
    #[test]
    fn disk_free_percent_missing_path_is_io_error() {
        let err = disk_free_percent(Path::new("/definitely/not/here")).unwrap_err();
        assert!(matches!(err, ProbeError::Io { .. }));
    }

    #[cfg(target_os = "linux")]
    mod linux {
        use super::super::*;

        const STAT: &str = "\
cpu  400 0 200 1200 200 0 0 0 0 0
cpu0 100 0 100 700 100 0 0 0 0 0
cpu1 300 0 100 500 100 0 0 0 0 0
intr 12345
ctxt 999
";

        #[test]
        fn core_times_skip_aggregate_line() {
            let cores = parse_core_times(STAT).unwrap();
            assert_eq!(cores.len(), 2);
            assert_eq!(cores[1].cpu, 1);
            assert_eq!(cores[0].total, 1000.0);
            assert_eq!(cores[0].busy, 200.0);
            assert_eq!(cores[1].busy, 400.0);
        }

        #[test]
        fn core_times_reject_missing_cores() {
            assert!(parse_core_times("cpu  1 2 3 4\nctxt 5\n").is_err());
        }

        #[test]
        fn cpu_usage_is_delta_based() {
            let prev = vec![core(0, 100.0, 1000.0), core(1, 100.0, 1000.0)];
            let cur = vec![core(0, 150.0, 1100.0), core(1, 200.0, 1100.0)];
            // 50% and 100% busy in the interval.
            assert!((average_cpu_usage(&prev, &cur) - 75.0).abs() < 1e-9);
            // Unchanged counters read as idle rather than dividing by zero.
            assert_eq!(average_cpu_usage(&cur, &cur), 0.0);
        }

        fn core(cpu: usize, busy: f64, total: f64) -> CoreTimes {
            CoreTimes { cpu, busy, total }
        }

        #[test]
        fn offlined_core_does_not_shift_the_others() {
            let prev = vec![
                core(0, 100.0, 1000.0),
                core(1, 900.0, 1000.0),
                core(2, 100.0, 1000.0),
            ];
            // cpu1 went offline; cpu2 must still be diffed against cpu2.
            let cur = vec![core(0, 150.0, 1100.0), core(2, 150.0, 1100.0)];
            assert!((average_cpu_usage(&prev, &cur) - 50.0).abs() < 1e-9);

            let stat = "cpu  0 0 0 0\ncpu0 1 0 1 8\ncpu2 3 0 1 6\n";
            let cores = parse_core_times(stat).unwrap();
            assert_eq!(cores.iter().map(|c| c.cpu).collect::<Vec<_>>(), vec![0, 2]);
        }

        #[test]
        fn meminfo_prefers_available() {
            let raw = "MemTotal:       16000 kB\nMemFree:         1000 kB\nMemAvailable:    4000 kB\n";
            let m = parse_meminfo(raw).unwrap();
            assert_eq!(m.total_bytes, 16000.0 * 1024.0);
            assert_eq!(m.available_bytes, 4000.0 * 1024.0);
            assert_eq!(m.used_bytes(), 12000.0 * 1024.0);
        }

        #[test]
        fn meminfo_without_total_is_an_error() {
            assert!(parse_meminfo("MemFree: 10 kB\n").is_err());
        }

        #[test]
        fn net_dev_sums_all_interfaces() {
            let raw = "\
Inter-|   Receive                                                |  Transmit
 face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed
    lo:  1000      10    0    0    0     0          0         0     1000      10    0    0    0     0       0          0
  eth0:  5000      50    0    0    0     0          0         0     3000      30    0    0    0     0       0          0
";
            let (tx, rx) = parse_net_dev(raw).unwrap();
            assert_eq!(tx, 4000.0);
            assert_eq!(rx, 6000.0);
        }

        #[test]
        fn diskstats_counts_whole_disks_only() {
            let raw = "\
   8       0 sda 100 0 2048 0 50 0 4096 0 0 0 0
   8       1 sda1 100 0 2048 0 50 0 4096 0 0 0 0
 259       0 nvme0n1 10 0 1024 0 5 0 512 0 0 0 0
 259       1 nvme0n1p1 10 0 1024 0 5 0 512 0 0 0 0
   7       0 loop0 10 0 8 0 0 0 0 0 0 0 0
";
            let (read, written) = parse_diskstats(raw);
            assert_eq!(read, (2048.0 + 1024.0) * 512.0);
            assert_eq!(written, (4096.0 + 512.0) * 512.0);
        }

        #[test]
        fn coretemp_takes_max_and_ignores_other_chips() {
            let root = tempfile::tempdir().unwrap();
            let core = root.path().join("hwmon0");
            std::fs::create_dir(&core).unwrap();
            std::fs::write(core.join("name"), "coretemp\n").unwrap();
            std::fs::write(core.join("temp1_input"), "45000\n").unwrap();
            std::fs::write(core.join("temp2_input"), "61500\n").unwrap();
            let other = root.path().join("hwmon1");
            std::fs::create_dir(&other).unwrap();
            std::fs::write(other.join("name"), "nvme\n").unwrap();
            std::fs::write(other.join("temp1_input"), "90000\n").unwrap();

            assert_eq!(max_coretemp(root.path()), Some(61.5));
        }

        #[test]
        fn coretemp_absent_without_sensors() {
            let root = tempfile::tempdir().unwrap();
            assert_eq!(max_coretemp(root.path()), None);
            assert_eq!(max_coretemp(Path::new("/no/such/hwmon")), None);
        }

        #[test]
        #[ignore] // Run with: cargo test -- --ignored
        fn host_snapshot_has_expected_keys() {
            let mut probe = HostProbe::new().with_disk_path("/");
            let snap = probe.snapshot().unwrap();
            for key in [
                "cpu_usage",
                "memory_used_gb",
                "memory_free_gb",
                "disk_free_percent",
                "network_tx_mbs",
                "network_rx_mbs",
                "io_read_mbs",
                "io_write_mbs",
            ] {
                assert!(snap.contains(key), "missing {key}");
            }
            assert_eq!(
                snap.get("network_rx_mbs").unwrap().kind,
                crate::MetricKind::Counter
            );
            assert_eq!(
                snap.get("cpu_usage").unwrap().kind,
                crate::MetricKind::Gauge
            );
        }
    }
}

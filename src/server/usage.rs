//! Process resource usage read from `/proc`.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

/// CPU usage is a delta between two samples, so the sampler keeps the last one.
#[derive(Debug, Default)]
pub struct CpuSampler {
    last_process_ticks: u64,
    last_total_ticks: u64,
    last_percent: f64,
}

impl CpuSampler {
    /// Feed a new sample and get the usage since the previous one.
    ///
    /// The first sample (and any sample where total time did not advance)
    /// returns the previous figure.
    pub fn update(&mut self, process_ticks: u64, total_ticks: u64, cpus: usize) -> f64 {
        if self.last_total_ticks > 0 && total_ticks > self.last_total_ticks {
            let d_proc = process_ticks.saturating_sub(self.last_process_ticks) as f64;
            let d_total = (total_ticks - self.last_total_ticks) as f64;
            self.last_percent = d_proc / d_total * 100.0 * cpus as f64;
        }
        self.last_process_ticks = process_ticks;
        self.last_total_ticks = total_ticks;
        self.last_percent
    }

    /// Sample this process from `/proc`. Returns `0.0` where `/proc` is unavailable.
    pub fn sample(&mut self) -> f64 {
        let process = fs::read_to_string("/proc/self/stat")
            .ok()
            .and_then(|s| parse_process_ticks(&s));
        let total = fs::read_to_string("/proc/stat")
            .ok()
            .and_then(|s| parse_total_ticks(&s));
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        match (process, total) {
            (Some(p), Some(t)) => self.update(p, t, cpus),
            _ => self.last_percent,
        }
    }
}

/// `utime + stime` from `/proc/self/stat`.
pub fn parse_process_ticks(stat: &str) -> Option<u64> {
    // comm (field 2) may contain spaces; fields after it start past the last ')'
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // rest[0] is field 3 (state), so utime (14) and stime (15) are at 11 and 12
    let utime: u64 = fields.get(11)?.parse().ok()?;
    let stime: u64 = fields.get(12)?.parse().ok()?;
    Some(utime + stime)
}

/// Sum of the aggregate `cpu` line in `/proc/stat`.
pub fn parse_total_ticks(stat: &str) -> Option<u64> {
    let line = stat.lines().next()?;
    let mut fields = line.split_whitespace();
    if fields.next()? != "cpu" {
        return None;
    }
    Some(fields.filter_map(|f| f.parse::<u64>().ok()).sum())
}

/// `VmRSS` in kB from `/proc/self/status`.
pub fn parse_vm_rss_kb(status: &str) -> Option<u64> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("VmRSS:"))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|kb| kb.parse().ok())
}

pub fn resident_memory_kb() -> u64 {
    fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|s| parse_vm_rss_kb(&s))
        .unwrap_or(0)
}

/// Root manager the device is running under, detected from its data directories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RootEnvironment {
    KernelSU,
    APatch,
    Magisk,
    #[serde(rename = "Unknown Root")]
    Unknown,
}

impl RootEnvironment {
    pub fn detect() -> Self {
        Self::detect_under(Path::new("/"))
    }

    /// Detect relative to `root` instead of `/`.
    pub fn detect_under(root: &Path) -> Self {
        let exists = |p: &str| -> bool { root.join(p).exists() };
        if exists("data/adb/ksu") || exists("data/adb/ksud") {
            Self::KernelSU
        } else if exists("data/adb/apatch") {
            Self::APatch
        } else if exists("sbin/magisk") || exists("data/adb/magisk") {
            Self::Magisk
        } else {
            Self::Unknown
        }
    }
}

/// Usage report for `/api/resource_usage`.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceUsage {
    pub real_ram_kb: u64,
    pub real_cpu: f64,
    pub environment: RootEnvironment,
    pub keybox_count: usize,
    pub app_config_size: u64,
    pub global_mode: bool,
    pub rkp_bypass: bool,
    pub tee_broken_mode: bool,
}

/// Size of `app_config` in the config dir, `0` if missing.
pub fn app_config_size(config_dir: &Path) -> u64 {
    let path: PathBuf = config_dir.join("app_config");
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

//! sysinfo and procfs backed [`SystemProbe`]
//!
//! Where `/proc/stat` exists, whole-system CPU times come from it, since it
//! exposes the cumulative idle/kernel/user split the stats loop differences.
//! Elsewhere sysinfo measures global CPU usage between refreshes. Process
//! memory and the processor count always come from sysinfo.

use anyhow::{anyhow, Context, Result};
use std::path::Path;
use sysinfo::{CpuRefreshKind, Pid, ProcessesToUpdate, RefreshKind, System};

use super::stats::{CpuTimes, CpuUsage, SystemProbe, SystemSnapshot};

const PROC_STAT: &str = "/proc/stat";
const PROC_SELF_STATUS: &str = "/proc/self/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CpuSource {
    Procfs,
    Sysinfo,
}

pub struct HostProbe {
    system: System,
    pid: Option<Pid>,
    peak: u64,
    source: CpuSource,
}

impl HostProbe {
    pub fn new() -> Self {
        let source = if Path::new(PROC_STAT).exists() {
            CpuSource::Procfs
        } else {
            CpuSource::Sysinfo
        };
        Self::with_source(source)
    }

    fn with_source(source: CpuSource) -> Self {
        let cpu = match source {
            CpuSource::Procfs => CpuRefreshKind::nothing(),
            CpuSource::Sysinfo => CpuRefreshKind::nothing().with_cpu_usage(),
        };
        let system = System::new_with_specifics(RefreshKind::nothing().with_cpu(cpu));
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(err) => {
                log::debug!("Current process id unavailable: {err}");
                None
            }
        };
        log::debug!("Host probe reads CPU counters from {source:?}");
        Self {
            system,
            pid,
            peak: 0,
            source,
        }
    }

    fn cpu_counters(&mut self) -> Result<(CpuTimes, Option<CpuUsage>)> {
        match self.source {
            CpuSource::Procfs => {
                let stat = std::fs::read_to_string(PROC_STAT)
                    .with_context(|| format!("Failed to read {PROC_STAT}"))?;
                Ok((parse_cpu_times(&stat)?, None))
            }
            CpuSource::Sysinfo => {
                self.system.refresh_cpu_usage();
                let usage = usage_from_percent(self.system.global_cpu_usage());
                Ok((CpuTimes::default(), Some(usage)))
            }
        }
    }
}

impl Default for HostProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProbe for HostProbe {
    fn is_available(&self) -> bool {
        self.pid.is_some()
    }

    fn sample(&mut self) -> Result<SystemSnapshot> {
        let pid = self
            .pid
            .ok_or_else(|| anyhow!("current process id is unavailable"))?;

        self.system
            .refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        let working_set = self
            .system
            .process(pid)
            .map(|process| process.memory())
            .unwrap_or_default();

        let reported_peak = match self.source {
            CpuSource::Procfs => std::fs::read_to_string(PROC_SELF_STATUS)
                .ok()
                .and_then(|status| parse_status_kib(&status, "VmHWM"))
                .map(|kib| kib * 1024)
                .unwrap_or_default(),
            CpuSource::Sysinfo => 0,
        };
        self.peak = self.peak.max(working_set).max(reported_peak);

        let (times, usage) = self.cpu_counters()?;

        let cpus = match self.system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, |count| count.get()),
            count => count,
        };

        Ok(SystemSnapshot {
            working_set,
            peak_working_set: self.peak,
            cpus,
            times,
            usage,
        })
    }
}

/// Whole-percent utilisation from sysinfo's global usage figure.
fn usage_from_percent(percent: f32) -> CpuUsage {
    let usage = if percent.is_finite() {
        percent.clamp(0.0, 100.0).round() as u64
    } else {
        0
    };
    CpuUsage {
        usage,
        idle: 100 - usage,
    }
}

/// Read the aggregate `cpu` line of `/proc/stat`.
///
/// Idle folds in iowait; kernel folds in system, irq, softirq, steal and
/// idle; user folds in nice.
pub fn parse_cpu_times(stat: &str) -> Result<CpuTimes> {
    let line = stat
        .lines()
        .find(|line| line.split_whitespace().next() == Some("cpu"))
        .ok_or_else(|| anyhow!("no aggregate cpu line in {PROC_STAT}"))?;

    let fields = line
        .split_whitespace()
        .skip(1)
        .map(|field| field.parse::<u64>())
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("malformed cpu line: {line}"))?;
    if fields.len() < 4 {
        return Err(anyhow!("cpu line has {} fields, need 4", fields.len()));
    }

    let field = |index: usize| fields.get(index).copied().unwrap_or(0);
    let (user, nice, system, idle) = (field(0), field(1), field(2), field(3));
    let (iowait, irq, softirq, steal) = (field(4), field(5), field(6), field(7));

    let idle = idle + iowait;
    Ok(CpuTimes {
        idle,
        kernel: system + irq + softirq + steal + idle,
        user: user + nice,
    })
}

/// Read a `Key:   123 kB` field from `/proc/self/status`.
pub fn parse_status_kib(status: &str, key: &str) -> Option<u64> {
    status.lines().find_map(|line| {
        let value = line.strip_prefix(key)?.strip_prefix(':')?;
        value.split_whitespace().next()?.parse().ok()
    })
}

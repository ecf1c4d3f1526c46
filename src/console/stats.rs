//! Periodic system-health reflection into the terminal title
//!
//! Once the server is ready the stats loop samples process memory and
//! whole-system CPU counters every poll interval and renders them as
//! `<name>[Memory:<mem>/<peak>M][CPU:<cpus>, usage: <pct>%][ServerTime:<time>]`.
//! Utilisation is a coarse estimate derived from the difference between two
//! consecutive cumulative samples, unless the probe measures it directly.

use anyhow::Result;
use chrono::{DateTime, Local};
use std::sync::Arc;

use super::{dispatch::Diagnostics, title::TitleSink};
use crate::core::{bus::Server, cancel::CancellationToken, config::ConsoleConfig};

const MIB: u64 = 1024 * 1024;

/// Cumulative system CPU times. Kernel time includes idle time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTimes {
    pub idle: u64,
    pub kernel: u64,
    pub user: u64,
}

/// Utilisation over one sampling interval, in whole percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuUsage {
    pub usage: u64,
    pub idle: u64,
}

impl CpuUsage {
    /// Utilisation between two samples.
    ///
    /// The idle share is truncated and usage is its complement. An empty or
    /// backwards interval reports zero for both.
    pub fn between(previous: &CpuTimes, current: &CpuTimes) -> Self {
        let (Some(idle), Some(kernel), Some(user)) = (
            current.idle.checked_sub(previous.idle),
            current.kernel.checked_sub(previous.kernel),
            current.user.checked_sub(previous.user),
        ) else {
            return Self::default();
        };

        let total = kernel + user;
        if total == 0 {
            return Self::default();
        }

        let idle = (idle.min(total) * 100) / total;
        Self {
            usage: 100 - idle,
            idle,
        }
    }
}

/// One reading of the host counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SystemSnapshot {
    /// Resident memory of this process, in bytes.
    pub working_set: u64,
    /// Highest resident memory seen for this process, in bytes.
    pub peak_working_set: u64,
    /// Logical processor count.
    pub cpus: usize,
    pub times: CpuTimes,
    /// Utilisation measured by the probe itself, for hosts that do not
    /// expose cumulative times. Takes precedence over `times`.
    pub usage: Option<CpuUsage>,
}

impl SystemSnapshot {
    /// Utilisation since the `previous` cumulative times.
    pub fn usage_since(&self, previous: &CpuTimes) -> CpuUsage {
        self.usage.unwrap_or_else(|| CpuUsage::between(previous, &self.times))
    }
}

/// Source of process and CPU counters.
pub trait SystemProbe: Send {
    /// Whether the host exposes the counters this probe reads.
    fn is_available(&self) -> bool;

    fn sample(&mut self) -> Result<SystemSnapshot>;
}

/// Render the status line shown in the terminal title.
pub fn format_title(
    server_name: &str,
    snapshot: &SystemSnapshot,
    usage: &CpuUsage,
    now: DateTime<Local>,
) -> String {
    format!(
        "{server_name}[Memory:{}/{}M][CPU:{}, usage: {:02}%][ServerTime:{}]",
        snapshot.working_set / MIB,
        snapshot.peak_working_set / MIB,
        snapshot.cpus,
        usage.usage,
        now.format("%Y-%m-%d %H:%M:%S%.3f"),
    )
}

pub(crate) struct StatsLoop {
    pub server: Arc<dyn Server>,
    pub probe: Box<dyn SystemProbe>,
    pub title: Box<dyn TitleSink>,
    pub config: ConsoleConfig,
    pub diagnostics: Diagnostics,
}

impl StatsLoop {
    pub fn run(mut self, cancel: CancellationToken) {
        log::info!("📊 Stats thread started");
        let interval = self.config.poll_interval();
        let mut previous = CpuTimes::default();

        while !cancel.is_cancelled() {
            if !self.server.is_ready() {
                cancel.wait(interval);
                continue;
            }

            match self.probe.sample() {
                Ok(snapshot) => {
                    let usage = snapshot.usage_since(&previous);
                    let title =
                        format_title(&self.config.server_name, &snapshot, &usage, Local::now());
                    if let Err(err) = self.title.set_title(&title) {
                        log::warn!("Failed to set terminal title: {err}");
                    }
                    previous = snapshot.times;
                }
                Err(err) => log::warn!("Failed to sample system counters: {err:#}"),
            }

            cancel.wait(interval);
        }

        self.diagnostics.emit("Quit stats thread!");
    }
}

//! Resource monitor
//!
//! Samples a running process's resident memory and user CPU time from procfs
//! and kills its process group as soon as a ceiling is crossed. The loop is
//! blocking and is meant to run on a `spawn_blocking` thread next to the
//! runner's wait on the same process.

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::{sysconf, Pid, SysconfVar};
use std::time::Duration;
use tracing::{debug, warn};

use crate::domain::Violation;

/// Pause between samples
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

const FALLBACK_PAGE_SIZE: u64 = 4096;
const FALLBACK_CLOCK_TICKS: u64 = 100;

/// Peaks observed while the process ran, and the breach that stopped it (if any)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MonitorReport {
    pub violation: Option<Violation>,
    pub peak_ram_bytes: u64,
    pub peak_cpu_secs: f64,
}

/// One parsed `/proc/<pid>/stat` line
#[derive(Debug, Clone, Copy, PartialEq)]
struct ProcSample {
    state: char,
    rss_bytes: u64,
    user_cpu_secs: f64,
}

impl ProcSample {
    fn is_dead(&self) -> bool {
        matches!(self.state, 'Z' | 'X' | 'x')
    }
}

pub struct ResourceMonitor {
    pid: u32,
    ram_limit_bytes: i64,
    cpu_limit_secs: f64,
    poll_interval: Duration,
    page_size: u64,
    clock_ticks: u64,
}

impl ResourceMonitor {
    pub fn new(pid: u32, ram_limit_bytes: i64, cpu_limit_secs: i64) -> Self {
        let (page_size, clock_ticks) = system_constants();
        Self {
            pid,
            ram_limit_bytes,
            cpu_limit_secs: cpu_limit_secs as f64,
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size,
            clock_ticks,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Sample until the process is gone or breaks a limit.
    ///
    /// A process that is already gone (missing, zombie, inaccessible) yields an
    /// empty report; that is how a fast natural exit looks from here.
    pub fn run(&self) -> MonitorReport {
        let mut report = MonitorReport::default();

        while let Some(sample) = self.sample() {
            report.peak_ram_bytes = report.peak_ram_bytes.max(sample.rss_bytes);
            report.peak_cpu_secs = report.peak_cpu_secs.max(sample.user_cpu_secs);

            if self.ram_limit_bytes != 0 && exceeds(sample.rss_bytes, self.ram_limit_bytes) {
                debug!(
                    "pid {} uses {} bytes of RAM (limit {}), killing",
                    self.pid, sample.rss_bytes, self.ram_limit_bytes
                );
                kill_process_group(self.pid);
                report.violation = Some(Violation::MemoryLimitExceeded);
                break;
            }

            if sample.user_cpu_secs > self.cpu_limit_secs {
                debug!(
                    "pid {} used {:.2}s of CPU (limit {}s), killing",
                    self.pid, sample.user_cpu_secs, self.cpu_limit_secs
                );
                kill_process_group(self.pid);
                report.violation = Some(Violation::CpuLimitExceeded);
                break;
            }

            if !self.poll_interval.is_zero() {
                std::thread::sleep(self.poll_interval);
            }
        }

        report
    }

    fn sample(&self) -> Option<ProcSample> {
        let stat = std::fs::read_to_string(format!("/proc/{}/stat", self.pid)).ok()?;
        parse_stat(&stat, self.page_size, self.clock_ticks).filter(|sample| !sample.is_dead())
    }
}

/// A negative limit is exceeded by any usage
fn exceeds(used: u64, limit: i64) -> bool {
    match u64::try_from(limit) {
        Ok(limit) => used > limit,
        Err(_) => true,
    }
}

/// Kill a whole process group. A group that no longer exists is not an error.
pub fn kill_process_group(pgid: u32) {
    let Ok(raw) = i32::try_from(pgid) else {
        warn!("Refusing to signal out-of-range process group {}", pgid);
        return;
    };

    match killpg(Pid::from_raw(raw), Signal::SIGKILL) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill process group {}: {}", pgid, e),
    }
}

fn system_constants() -> (u64, u64) {
    let query = |var: SysconfVar, fallback: u64| {
        sysconf(var)
            .ok()
            .flatten()
            .and_then(|value| u64::try_from(value).ok())
            .filter(|value| *value > 0)
            .unwrap_or(fallback)
    };

    (
        query(SysconfVar::PAGE_SIZE, FALLBACK_PAGE_SIZE),
        query(SysconfVar::CLK_TCK, FALLBACK_CLOCK_TICKS),
    )
}

/// Parse `/proc/<pid>/stat`. The command name may contain spaces and
/// parentheses, so fields are counted from the last `)`.
fn parse_stat(stat: &str, page_size: u64, clock_ticks: u64) -> Option<ProcSample> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();

    // fields[0] is field 3 (state); utime is field 14, rss is field 24
    let state = fields.first()?.chars().next()?;
    let utime_ticks: u64 = fields.get(11)?.parse().ok()?;
    let rss_pages: i64 = fields.get(21)?.parse().ok()?;

    Some(ProcSample {
        state,
        rss_bytes: u64::try_from(rss_pages).unwrap_or(0) * page_size,
        user_cpu_secs: utime_ticks as f64 / clock_ticks as f64,
    })
}

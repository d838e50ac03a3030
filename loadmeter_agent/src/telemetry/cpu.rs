//! CPU time breakdown between consecutive reads.
//!
//! Linux reads aggregate jiffies from `/proc/stat`; the first read of a sampler
//! blocks for a short window to get a baseline, later reads diff against the
//! previous one. Elsewhere sysinfo only exposes a single busy percentage, which
//! is reported as `user`.

use std::sync::Mutex;
use std::time::Duration;

use crate::error::TelemetryError;
use crate::types::CpuTimes;

#[cfg(target_os = "linux")]
const PROC_STAT: &str = "/proc/stat";

/// Aggregate CPU jiffies since boot, as listed on the `cpu ` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuStats {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuStats {
    pub fn parse(content: &str) -> Result<Self, TelemetryError> {
        let line = content
            .lines()
            .find(|l| l.starts_with("cpu "))
            .ok_or_else(|| TelemetryError::Parse("no aggregate cpu line in /proc/stat".into()))?;
        let fields: Vec<u64> = line
            .split_whitespace()
            .skip(1)
            .take(8)
            .map(|tok| tok.parse::<u64>())
            .collect::<Result<_, _>>()
            .map_err(|e| TelemetryError::Parse(format!("/proc/stat cpu line: {e}")))?;
        // user nice system idle are always present; older kernels stop there
        if fields.len() < 4 {
            return Err(TelemetryError::Parse(format!(
                "/proc/stat cpu line has {} fields",
                fields.len()
            )));
        }
        let f = |i: usize| fields.get(i).copied().unwrap_or(0);
        Ok(Self {
            user: f(0),
            nice: f(1),
            system: f(2),
            idle: f(3),
            iowait: f(4),
            irq: f(5),
            softirq: f(6),
            steal: f(7),
        })
    }

    fn total(&self) -> u64 {
        self.user
            .saturating_add(self.nice)
            .saturating_add(self.system)
            .saturating_add(self.idle)
            .saturating_add(self.iowait)
            .saturating_add(self.irq)
            .saturating_add(self.softirq)
            .saturating_add(self.steal)
    }

    /// Percent of elapsed jiffies between `prev` and `now`. Steal time is counted in
    /// the denominator only, so the three shares may sum slightly below 100.
    pub fn percentages(prev: &CpuStats, now: &CpuStats) -> CpuTimes {
        let dt = now.total().saturating_sub(prev.total());
        if dt == 0 {
            return CpuTimes {
                user: 0.0,
                system: 0.0,
                idle: 100.0,
            };
        }
        let d = |a: u64, b: u64| a.saturating_sub(b) as f64;
        let user = d(now.user, prev.user) + d(now.nice, prev.nice);
        let system =
            d(now.system, prev.system) + d(now.irq, prev.irq) + d(now.softirq, prev.softirq);
        let idle = d(now.idle, prev.idle) + d(now.iowait, prev.iowait);
        let pct = |v: f64| round1(v / dt as f64 * 100.0);
        CpuTimes {
            user: pct(user),
            system: pct(system),
            idle: pct(idle),
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

#[cfg(target_os = "linux")]
fn read_proc_stat() -> Result<CpuStats, TelemetryError> {
    let s = std::fs::read_to_string(PROC_STAT).map_err(|source| TelemetryError::Io {
        path: PROC_STAT,
        source,
    })?;
    CpuStats::parse(&s)
}

#[cfg(target_os = "linux")]
pub struct CpuSampler {
    window: Duration,
    last: Mutex<Option<CpuStats>>,
}

#[cfg(target_os = "linux")]
impl CpuSampler {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    pub fn read(&self) -> Result<CpuTimes, TelemetryError> {
        let mut last = self.last.lock().map_err(|_| TelemetryError::Poisoned("cpu"))?;
        let prev = match last.take() {
            Some(p) => p,
            None => {
                let p = read_proc_stat()?;
                std::thread::sleep(self.window);
                p
            }
        };
        let now = read_proc_stat()?;
        *last = Some(now);
        Ok(CpuStats::percentages(&prev, &now))
    }
}

#[cfg(not(target_os = "linux"))]
pub struct CpuSampler {
    window: Duration,
    sys: Mutex<(sysinfo::System, bool)>,
}

#[cfg(not(target_os = "linux"))]
impl CpuSampler {
    pub fn new(window: Duration) -> Self {
        Self {
            window: window.max(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL),
            sys: Mutex::new((sysinfo::System::new(), false)),
        }
    }

    pub fn read(&self) -> Result<CpuTimes, TelemetryError> {
        let mut guard = self.sys.lock().map_err(|_| TelemetryError::Poisoned("cpu"))?;
        let (sys, primed) = &mut *guard;
        if !*primed {
            sys.refresh_cpu_usage();
            std::thread::sleep(self.window);
            *primed = true;
        }
        sys.refresh_cpu_usage();
        let busy = f64::from(sys.global_cpu_usage()).clamp(0.0, 100.0);
        Ok(CpuTimes {
            user: round1(busy),
            system: 0.0,
            idle: round1(100.0 - busy),
        })
    }
}

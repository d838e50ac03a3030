//! Telemetry sources: one independent read per metric category.

mod cpu;
mod power;

pub use cpu::{CpuSampler, CpuStats};
pub use power::{SimulatedPower, DEFAULT_POWER_CEILING, DEFAULT_POWER_MAX, DEFAULT_POWER_MIN};

use std::sync::Mutex;
use std::time::Duration;

use sysinfo::{MemoryRefreshKind, Networks, RefreshKind, System};

use crate::error::TelemetryError;
use crate::types::{CpuTimes, InterfaceCounters, MemoryUsage, NetworkCounters, PowerReading};

pub const DEFAULT_CPU_WINDOW: Duration = Duration::from_millis(200);

/// The four reads the orchestrator pulls once per tick. Reads are blocking and may
/// take a noticeable amount of time (the CPU read measures over a window), so callers
/// should run them off the async executor.
pub trait TelemetrySource: Send + Sync {
    fn read_cpu(&self) -> Result<CpuTimes, TelemetryError>;
    fn read_memory(&self) -> Result<MemoryUsage, TelemetryError>;
    fn read_network(&self) -> Result<NetworkCounters, TelemetryError>;
    fn read_power(&self) -> Result<PowerReading, TelemetryError>;
}

/// Host telemetry backed by `/proc` and sysinfo. Create one per run: the CPU
/// read keeps the previous snapshot to compute deltas.
pub struct SystemTelemetry {
    cpu: CpuSampler,
    sys: Mutex<System>,
    nets: Mutex<Networks>,
    power: SimulatedPower,
}

impl SystemTelemetry {
    pub fn new(cpu_window: Duration, power: SimulatedPower) -> Self {
        let sys = System::new_with_specifics(
            RefreshKind::nothing().with_memory(MemoryRefreshKind::nothing().with_ram()),
        );
        // keep Networks alive across reads; new interfaces are picked up on refresh
        let nets = Networks::new_with_refreshed_list();
        Self {
            cpu: CpuSampler::new(cpu_window),
            sys: Mutex::new(sys),
            nets: Mutex::new(nets),
            power,
        }
    }
}

impl Default for SystemTelemetry {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_WINDOW, SimulatedPower::default())
    }
}

impl TelemetrySource for SystemTelemetry {
    fn read_cpu(&self) -> Result<CpuTimes, TelemetryError> {
        self.cpu.read()
    }

    fn read_memory(&self) -> Result<MemoryUsage, TelemetryError> {
        let mut sys = self.sys.lock().map_err(|_| TelemetryError::Poisoned("memory"))?;
        sys.refresh_memory_specifics(MemoryRefreshKind::nothing().with_ram());
        Ok(memory_usage(
            sys.total_memory(),
            sys.available_memory(),
            sys.used_memory(),
            sys.free_memory(),
        ))
    }

    fn read_network(&self) -> Result<NetworkCounters, TelemetryError> {
        let mut nets = self.nets.lock().map_err(|_| TelemetryError::Poisoned("network"))?;
        nets.refresh(true);
        Ok(nets
            .iter()
            .map(|(name, data)| {
                (
                    name.to_string(),
                    InterfaceCounters {
                        bytes_sent: data.total_transmitted(),
                        bytes_received: data.total_received(),
                    },
                )
            })
            .collect())
    }

    fn read_power(&self) -> Result<PowerReading, TelemetryError> {
        Ok(self.power.read())
    }
}

/// Counters are reported as the platform gives them. Percent follows the usual
/// "not available" definition, (total - available) / total, clamped to 0..=100.
fn memory_usage(total: u64, available: u64, used: u64, free: u64) -> MemoryUsage {
    let percent = if total == 0 {
        0.0
    } else {
        let p = total.saturating_sub(available) as f64 / total as f64 * 100.0;
        ((p * 10.0).round() / 10.0).clamp(0.0, 100.0)
    };
    MemoryUsage {
        total,
        available,
        used,
        free,
        percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_percent_and_bounds() {
        let m = memory_usage(1000, 250, 750, 100);
        assert_eq!(m.percent, 75.0);
        assert!(m.used + m.free <= m.total);

        // odd platform accounting is passed through; only percent is bounded
        let m = memory_usage(1000, 2000, 900, 500);
        assert_eq!(m.percent, 0.0);
        assert_eq!((m.available, m.used, m.free), (2000, 900, 500));

        assert_eq!(memory_usage(0, 0, 0, 0).percent, 0.0);
    }

    #[test]
    fn system_reads_are_sane() {
        let t = SystemTelemetry::new(Duration::from_millis(50), SimulatedPower::default());
        let m = t.read_memory().unwrap();
        assert!(m.total > 0);
        assert!((0.0..=100.0).contains(&m.percent));
        assert!(m.used <= m.total);

        let cpu = t.read_cpu().unwrap();
        assert!(cpu.idle >= 0.0);

        let first = t.read_network().unwrap();
        let second = t.read_network().unwrap();
        for (name, c) in &first {
            if let Some(later) = second.get(name) {
                assert!(later.bytes_sent >= c.bytes_sent);
                assert!(later.bytes_received >= c.bytes_received);
            }
        }

        let p = t.read_power().unwrap();
        assert!(p.current_value >= 0.0);
    }
}

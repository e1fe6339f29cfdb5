pub mod system;

use crate::state::{
    now_unix_ms, BatteryMetrics, CpuMetrics, DiskIoMetrics, Family, MemoryMetrics,
    NetworkMetrics, Snapshot, StorageMetrics,
};
use std::time::Instant;

/// Point-in-time reads of the six counter families.
///
/// A read never fails: an unavailable source yields that family's zero
/// record and is reported through [`CounterSource::take_failures`].
pub trait CounterSource: Send + 'static {
    fn read_cpu(&mut self) -> CpuMetrics;
    fn read_memory(&mut self) -> MemoryMetrics;
    fn read_network(&mut self) -> NetworkMetrics;
    fn read_storage(&mut self) -> StorageMetrics;
    fn read_battery(&mut self) -> BatteryMetrics;
    fn read_disk_io(&mut self) -> DiskIoMetrics;

    fn read_all(&mut self) -> Snapshot {
        let captured_at_ms = now_unix_ms();
        Snapshot {
            cpu: self.read_cpu(),
            memory: self.read_memory(),
            network: self.read_network(),
            storage: self.read_storage(),
            battery: self.read_battery(),
            disk_io: self.read_disk_io(),
            captured_at_ms,
        }
    }

    /// Families that fell back to zero since the previous call.
    fn take_failures(&mut self) -> Vec<Family> {
        Vec::new()
    }
}

/// Bytes per second between two cumulative counter readings.
pub fn rate_per_sec(prev: u64, curr: u64, elapsed_secs: f64) -> f64 {
    if curr < prev || elapsed_secs <= 0.0 {
        return 0.0;
    }
    (curr - prev) as f64 / elapsed_secs
}

/// Remembers the previous pair of cumulative counters to derive rates.
#[derive(Debug, Default)]
pub struct DeltaTracker {
    prev: Option<(u64, u64, Instant)>,
}

impl DeltaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns per-second rates for `(a, b)`; both are zero on the first call.
    pub fn observe(&mut self, a: u64, b: u64, now: Instant) -> (f64, f64) {
        let rates = match self.prev {
            Some((pa, pb, at)) => {
                let elapsed = now.saturating_duration_since(at).as_secs_f64();
                (rate_per_sec(pa, a, elapsed), rate_per_sec(pb, b, elapsed))
            }
            None => (0.0, 0.0),
        };
        self.prev = Some((a, b, now));
        rates
    }

    pub fn reset(&mut self) {
        self.prev = None;
    }
}

/// Cumulative per-state CPU ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub system: u64,
    pub nice: u64,
    pub idle: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        self.user + self.system + self.nice + self.idle
    }

    pub fn saturating_sub(&self, other: &CpuTicks) -> CpuTicks {
        CpuTicks {
            user: self.user.saturating_sub(other.user),
            system: self.system.saturating_sub(other.system),
            nice: self.nice.saturating_sub(other.nice),
            idle: self.idle.saturating_sub(other.idle),
        }
    }

    /// Shares of each state in percent. An all-zero window reads as fully idle.
    pub fn to_metrics(self, captured_at_ms: i64) -> CpuMetrics {
        let total = self.total();
        if total == 0 {
            return CpuMetrics {
                user: 0.0,
                system: 0.0,
                nice: 0.0,
                idle: 100.0,
                captured_at_ms,
            };
        }
        let pct = |v: u64| v as f64 / total as f64 * 100.0;
        CpuMetrics {
            user: pct(self.user),
            system: pct(self.system),
            nice: pct(self.nice),
            idle: pct(self.idle),
            captured_at_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn rate_is_delta_over_elapsed() {
        assert_eq!(rate_per_sec(1000, 1500, 1.0), 500.0);
        assert_eq!(rate_per_sec(1000, 2000, 2.0), 500.0);
    }

    #[test]
    fn counter_reset_or_bad_interval_reads_as_zero() {
        assert_eq!(rate_per_sec(1000, 900, 1.0), 0.0);
        assert_eq!(rate_per_sec(1000, 1500, 0.0), 0.0);
        assert_eq!(rate_per_sec(1000, 1500, -1.0), 0.0);
    }

    #[test]
    fn delta_tracker_needs_a_previous_reading() {
        let start = Instant::now();
        let mut tracker = DeltaTracker::new();
        assert_eq!(tracker.observe(1000, 10, start), (0.0, 0.0));

        let (a, b) = tracker.observe(1500, 30, start + Duration::from_secs(1));
        assert_eq!(a, 500.0);
        assert_eq!(b, 20.0);

        let (a, _) = tracker.observe(100, 40, start + Duration::from_secs(2));
        assert_eq!(a, 0.0);

        tracker.reset();
        assert_eq!(
            tracker.observe(5000, 50, start + Duration::from_secs(3)),
            (0.0, 0.0)
        );
    }

    #[test]
    fn cpu_ticks_become_percent_shares() {
        let prev = CpuTicks {
            user: 100,
            system: 50,
            nice: 0,
            idle: 850,
        };
        let curr = CpuTicks {
            user: 130,
            system: 60,
            nice: 10,
            idle: 900,
        };
        let cpu = curr.saturating_sub(&prev).to_metrics(7);
        assert!((cpu.user - 30.0).abs() < 1e-9);
        assert!((cpu.system - 10.0).abs() < 1e-9);
        assert!((cpu.nice - 10.0).abs() < 1e-9);
        assert!((cpu.idle - 50.0).abs() < 1e-9);
        assert!((cpu.user + cpu.system + cpu.nice + cpu.idle - 100.0).abs() < 1e-9);
        assert_eq!(cpu.captured_at_ms, 7);
    }

    #[test]
    fn idle_window_reads_as_fully_idle() {
        let cpu = CpuTicks::default().to_metrics(0);
        assert_eq!(cpu.idle, 100.0);
        assert_eq!(cpu.usage(), 0.0);
    }
}

use crate::collectors::{CounterSource, CpuTicks, DeltaTracker};
use crate::state::{
    now_unix_ms, BatteryMetrics, BatteryState, CpuMetrics, DiskIoMetrics, Family, MemoryMetrics,
    MetricRecord, NetworkMetrics, StorageMetrics,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use sysinfo::{CpuExt, DiskExt, NetworkExt, NetworksExt, System, SystemExt};
use tracing::debug;

const LOOPBACK_IFACES: [&str; 2] = ["lo", "lo0"];

/// Counter reader backed by procfs/sysfs with `sysinfo` for interfaces and volumes.
pub struct SystemCounters {
    system: System,
    storage_path: PathBuf,
    proc_dir: PathBuf,
    power_supply_dir: PathBuf,
    prev_cpu: Option<CpuTicks>,
    network: DeltaTracker,
    disk_io: DeltaTracker,
    failures: Vec<Family>,
}

impl SystemCounters {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Self::with_roots(storage_path, "/proc", "/sys/class/power_supply")
    }

    pub fn with_roots(
        storage_path: impl Into<PathBuf>,
        proc_dir: impl Into<PathBuf>,
        power_supply_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            system: System::new(),
            storage_path: storage_path.into(),
            proc_dir: proc_dir.into(),
            power_supply_dir: power_supply_dir.into(),
            prev_cpu: None,
            network: DeltaTracker::new(),
            disk_io: DeltaTracker::new(),
            failures: Vec::new(),
        }
    }

    fn unavailable<T: MetricRecord>(&mut self, reason: &str) -> T {
        debug!(
            family = T::FAMILY.as_str(),
            reason, "счётчик недоступен, используется нулевая запись"
        );
        self.failures.push(T::FAMILY);
        T::zero(now_unix_ms())
    }

    fn read_proc(&self, name: &str) -> Option<String> {
        fs::read_to_string(self.proc_dir.join(name)).ok()
    }
}

impl CounterSource for SystemCounters {
    fn read_cpu(&mut self) -> CpuMetrics {
        let now = now_unix_ms();
        if let Some(ticks) = self.read_proc("stat").as_deref().and_then(parse_proc_stat) {
            let window = match self.prev_cpu {
                Some(prev) => ticks.saturating_sub(&prev),
                None => ticks,
            };
            self.prev_cpu = Some(ticks);
            return window.to_metrics(now);
        }

        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return self.unavailable("нет данных о процессорах");
        }
        let usage = f64::from(self.system.global_cpu_info().cpu_usage()).clamp(0.0, 100.0);
        CpuMetrics {
            user: usage,
            system: 0.0,
            nice: 0.0,
            idle: 100.0 - usage,
            captured_at_ms: now,
        }
    }

    fn read_memory(&mut self) -> MemoryMetrics {
        let now = now_unix_ms();
        if let Some(info) = self.read_proc("meminfo").as_deref().and_then(parse_meminfo) {
            return info.to_metrics(now);
        }

        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return self.unavailable("нет данных о памяти");
        }
        let used = self.system.used_memory().min(total);
        MemoryMetrics {
            used,
            total,
            free: self.system.free_memory(),
            active: used,
            inactive: 0,
            wired: 0,
            compressed: 0,
            captured_at_ms: now,
        }
    }

    fn read_network(&mut self) -> NetworkMetrics {
        self.system.refresh_networks_list();
        self.system.refresh_networks();

        let mut rx = 0_u64;
        let mut tx = 0_u64;
        let mut packets_rx = 0_u64;
        let mut packets_tx = 0_u64;
        for (iface, data) in self.system.networks().iter() {
            if LOOPBACK_IFACES.contains(&iface.as_str()) {
                continue;
            }
            rx = rx.saturating_add(data.total_received());
            tx = tx.saturating_add(data.total_transmitted());
            packets_rx = packets_rx.saturating_add(data.total_packets_received());
            packets_tx = packets_tx.saturating_add(data.total_packets_transmitted());
        }

        let (download_speed, upload_speed) = self.network.observe(rx, tx, Instant::now());
        NetworkMetrics {
            bytes_received: rx,
            bytes_sent: tx,
            packets_received: packets_rx,
            packets_sent: packets_tx,
            download_speed,
            upload_speed,
            captured_at_ms: now_unix_ms(),
        }
    }

    fn read_storage(&mut self) -> StorageMetrics {
        self.system.refresh_disks_list();
        self.system.refresh_disks();

        let volume = self
            .system
            .disks()
            .iter()
            .filter(|d| self.storage_path.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| (d.total_space(), d.available_space()));

        match volume {
            Some((total, free)) if total > 0 => StorageMetrics {
                total,
                used: total.saturating_sub(free),
                free: free.min(total),
                captured_at_ms: now_unix_ms(),
            },
            _ => self.unavailable("том для каталога хранилища не найден"),
        }
    }

    fn read_battery(&mut self) -> BatteryMetrics {
        match read_power_supply(&self.power_supply_dir) {
            Some((level, state)) => BatteryMetrics {
                level,
                state,
                captured_at_ms: now_unix_ms(),
            },
            None => self.unavailable("батарея не найдена"),
        }
    }

    fn read_disk_io(&mut self) -> DiskIoMetrics {
        let Some((paged_in, paged_out)) = self.read_proc("vmstat").as_deref().and_then(parse_vmstat)
        else {
            self.disk_io.reset();
            return self.unavailable("нет счётчиков подкачки");
        };
        let (read_speed, write_speed) = self.disk_io.observe(paged_in, paged_out, Instant::now());
        DiskIoMetrics {
            bytes_read: paged_in,
            bytes_written: paged_out,
            read_speed,
            write_speed,
            captured_at_ms: now_unix_ms(),
        }
    }

    fn take_failures(&mut self) -> Vec<Family> {
        std::mem::take(&mut self.failures)
    }
}

/// Aggregate `cpu` line of `/proc/stat`. irq/softirq count as system, iowait as idle.
pub fn parse_proc_stat(text: &str) -> Option<CpuTicks> {
    let line = text.lines().find(|l| l.starts_with("cpu "))?;
    let fields: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .map(|v| v.parse::<u64>())
        .collect::<Result<_, _>>()
        .ok()?;
    if fields.len() < 4 {
        return None;
    }
    let at = |i: usize| fields.get(i).copied().unwrap_or(0);
    Some(CpuTicks {
        user: at(0),
        nice: at(1),
        system: at(2) + at(5) + at(6),
        idle: at(3) + at(4),
    })
}

/// `key value [unit]` tables such as `/proc/meminfo` and `/proc/vmstat`.
pub fn parse_counters(text: &str) -> HashMap<&str, u64> {
    text.lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let key = parts.next()?.trim_end_matches(':');
            let value = parts.next()?.parse::<u64>().ok()?;
            Some((key, value))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    pub total: u64,
    pub free: u64,
    pub active: u64,
    pub inactive: u64,
    pub unevictable: u64,
    pub zswap: u64,
}

impl MemInfo {
    pub fn to_metrics(self, captured_at_ms: i64) -> MemoryMetrics {
        let used = (self.active + self.unevictable + self.zswap).min(self.total);
        MemoryMetrics {
            used,
            total: self.total,
            free: self.free,
            active: self.active,
            inactive: self.inactive,
            wired: self.unevictable,
            compressed: self.zswap,
            captured_at_ms,
        }
    }
}

/// Byte counts from `/proc/meminfo`; `None` without a positive `MemTotal`.
pub fn parse_meminfo(text: &str) -> Option<MemInfo> {
    let table = parse_counters(text);
    let kib = |key: &str| table.get(key).copied().unwrap_or(0).saturating_mul(1024);
    let total = kib("MemTotal");
    if total == 0 {
        return None;
    }
    Some(MemInfo {
        total,
        free: kib("MemFree"),
        active: kib("Active"),
        inactive: kib("Inactive"),
        unevictable: kib("Unevictable"),
        zswap: kib("Zswap"),
    })
}

/// Cumulative paged-in/paged-out bytes from `/proc/vmstat`.
pub fn parse_vmstat(text: &str) -> Option<(u64, u64)> {
    let table = parse_counters(text);
    let paged_in = table.get("pgpgin")?.saturating_mul(1024);
    let paged_out = table.get("pgpgout")?.saturating_mul(1024);
    Some((paged_in, paged_out))
}

pub fn battery_state_from_status(status: &str) -> BatteryState {
    match status.trim() {
        "Charging" => BatteryState::Charging,
        "Discharging" => BatteryState::Unplugged,
        "Full" => BatteryState::Full,
        "Not charging" => BatteryState::Plugged,
        _ => BatteryState::Unknown,
    }
}

fn read_power_supply(dir: &Path) -> Option<(f64, BatteryState)> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .collect();
    entries.sort();

    for path in entries {
        let is_battery = fs::read_to_string(path.join("type"))
            .map(|t| t.trim() == "Battery")
            .unwrap_or(false);
        if !is_battery {
            continue;
        }
        let Some(level) = fs::read_to_string(path.join("capacity"))
            .ok()
            .and_then(|v| v.trim().parse::<f64>().ok())
        else {
            continue;
        };
        let state = fs::read_to_string(path.join("status"))
            .map(|s| battery_state_from_status(&s))
            .unwrap_or(BatteryState::Unknown);
        return Some((level.clamp(0.0, 100.0), state));
    }
    None
}

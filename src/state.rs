use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub const BYTES_PER_GIB: f64 = 1_073_741_824.0;
pub const BYTES_PER_MIB: f64 = 1_048_576.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Cpu,
    Memory,
    Network,
    Storage,
    Battery,
    DiskIo,
}

impl Family {
    pub const ALL: [Family; 6] = [
        Family::Cpu,
        Family::Memory,
        Family::Network,
        Family::Storage,
        Family::Battery,
        Family::DiskIo,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Family::Cpu => "cpu",
            Family::Memory => "memory",
            Family::Network => "network",
            Family::Storage => "storage",
            Family::Battery => "battery",
            Family::DiskIo => "disk_io",
        }
    }

    /// Slot name of this family's history in the shared store.
    pub fn history_key(self) -> &'static str {
        match self {
            Family::Cpu => "cpuHistory",
            Family::Memory => "memoryHistory",
            Family::Network => "networkHistory",
            Family::Storage => "storageHistory",
            Family::Battery => "batteryHistory",
            Family::DiskIo => "diskIOHistory",
        }
    }
}

/// Common surface of the per-family counter records.
pub trait MetricRecord: Clone {
    const FAMILY: Family;

    fn zero(captured_at_ms: i64) -> Self;
    fn captured_at_ms(&self) -> i64;
    /// Scalar value of `kind` for this record, `None` when the kind belongs to another family.
    fn value_of(&self, kind: MetricKind) -> Option<f64>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuMetrics {
    pub user: f64,
    pub system: f64,
    pub nice: f64,
    pub idle: f64,
    pub captured_at_ms: i64,
}

impl CpuMetrics {
    pub fn usage(&self) -> f64 {
        (100.0 - self.idle).clamp(0.0, 100.0)
    }
}

impl MetricRecord for CpuMetrics {
    const FAMILY: Family = Family::Cpu;

    fn zero(captured_at_ms: i64) -> Self {
        Self {
            user: 0.0,
            system: 0.0,
            nice: 0.0,
            idle: 100.0,
            captured_at_ms,
        }
    }

    fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    fn value_of(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::CpuTotal => Some(self.usage()),
            MetricKind::CpuUser => Some(self.user),
            MetricKind::CpuSystem => Some(self.system),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryMetrics {
    pub used: u64,
    pub total: u64,
    pub free: u64,
    pub active: u64,
    pub inactive: u64,
    pub wired: u64,
    pub compressed: u64,
    pub captured_at_ms: i64,
}

impl MemoryMetrics {
    pub fn usage_percentage(&self) -> f64 {
        percent_of(self.used, self.total)
    }
}

impl MetricRecord for MemoryMetrics {
    const FAMILY: Family = Family::Memory;

    fn zero(captured_at_ms: i64) -> Self {
        Self {
            used: 0,
            total: 0,
            free: 0,
            active: 0,
            inactive: 0,
            wired: 0,
            compressed: 0,
            captured_at_ms,
        }
    }

    fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    fn value_of(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::MemoryTotal => Some(self.usage_percentage()),
            MetricKind::MemoryActive => Some(percent_of(self.active, self.total)),
            MetricKind::MemoryWired => Some(percent_of(self.wired, self.total)),
            MetricKind::MemoryCompressed => Some(percent_of(self.compressed, self.total)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetrics {
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub packets_received: u64,
    pub packets_sent: u64,
    /// Bytes per second.
    pub download_speed: f64,
    pub upload_speed: f64,
    pub captured_at_ms: i64,
}

impl MetricRecord for NetworkMetrics {
    const FAMILY: Family = Family::Network;

    fn zero(captured_at_ms: i64) -> Self {
        Self {
            bytes_received: 0,
            bytes_sent: 0,
            packets_received: 0,
            packets_sent: 0,
            download_speed: 0.0,
            upload_speed: 0.0,
            captured_at_ms,
        }
    }

    fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    fn value_of(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::NetworkDownload => Some(self.download_speed),
            MetricKind::NetworkUpload => Some(self.upload_speed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageMetrics {
    pub total: u64,
    pub used: u64,
    pub free: u64,
    pub captured_at_ms: i64,
}

impl StorageMetrics {
    pub fn usage_percentage(&self) -> f64 {
        percent_of(self.used, self.total)
    }
}

impl MetricRecord for StorageMetrics {
    const FAMILY: Family = Family::Storage;

    fn zero(captured_at_ms: i64) -> Self {
        Self {
            total: 0,
            used: 0,
            free: 0,
            captured_at_ms,
        }
    }

    fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    fn value_of(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::StorageUsed => Some(self.usage_percentage()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryState {
    Unknown,
    Unplugged,
    Plugged,
    Charging,
    Full,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryMetrics {
    /// Charge level in percent (0..100).
    pub level: f64,
    pub state: BatteryState,
    pub captured_at_ms: i64,
}

impl MetricRecord for BatteryMetrics {
    const FAMILY: Family = Family::Battery;

    fn zero(captured_at_ms: i64) -> Self {
        Self {
            level: 0.0,
            state: BatteryState::Unknown,
            captured_at_ms,
        }
    }

    fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    fn value_of(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::BatteryLevel => Some(self.level),
            _ => None,
        }
    }
}

/// Paging activity used as a proxy for disk throughput.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskIoMetrics {
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub read_speed: f64,
    pub write_speed: f64,
    pub captured_at_ms: i64,
}

impl MetricRecord for DiskIoMetrics {
    const FAMILY: Family = Family::DiskIo;

    fn zero(captured_at_ms: i64) -> Self {
        Self {
            bytes_read: 0,
            bytes_written: 0,
            read_speed: 0.0,
            write_speed: 0.0,
            captured_at_ms,
        }
    }

    fn captured_at_ms(&self) -> i64 {
        self.captured_at_ms
    }

    fn value_of(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::DiskRead => Some(self.read_speed),
            MetricKind::DiskWrite => Some(self.write_speed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cpu: CpuMetrics,
    pub memory: MemoryMetrics,
    pub network: NetworkMetrics,
    pub storage: StorageMetrics,
    pub battery: BatteryMetrics,
    pub disk_io: DiskIoMetrics,
    pub captured_at_ms: i64,
}

impl Snapshot {
    pub fn zero(captured_at_ms: i64) -> Self {
        Self {
            cpu: CpuMetrics::zero(captured_at_ms),
            memory: MemoryMetrics::zero(captured_at_ms),
            network: NetworkMetrics::zero(captured_at_ms),
            storage: StorageMetrics::zero(captured_at_ms),
            battery: BatteryMetrics::zero(captured_at_ms),
            disk_io: DiskIoMetrics::zero(captured_at_ms),
            captured_at_ms,
        }
    }

    /// Fixed illustrative values shown by readers that have nothing to load yet.
    pub fn placeholder(captured_at_ms: i64) -> Self {
        const GIB: u64 = 1 << 30;
        Self {
            cpu: CpuMetrics {
                user: 30.0,
                system: 15.0,
                nice: 0.0,
                idle: 55.0,
                captured_at_ms,
            },
            memory: MemoryMetrics {
                used: 5 * GIB,
                total: 8 * GIB,
                free: GIB,
                active: 3 * GIB,
                inactive: 2 * GIB,
                wired: 3 * GIB / 2,
                compressed: GIB / 2,
                captured_at_ms,
            },
            network: NetworkMetrics {
                bytes_received: 750 * (1 << 20),
                bytes_sent: 120 * (1 << 20),
                packets_received: 540_000,
                packets_sent: 210_000,
                download_speed: 1.2 * BYTES_PER_MIB,
                upload_speed: 256.0 * 1024.0,
                captured_at_ms,
            },
            storage: StorageMetrics {
                total: 128 * GIB,
                used: 80 * GIB,
                free: 48 * GIB,
                captured_at_ms,
            },
            battery: BatteryMetrics {
                level: 76.0,
                state: BatteryState::Unplugged,
                captured_at_ms,
            },
            disk_io: DiskIoMetrics {
                bytes_read: 2 * GIB,
                bytes_written: GIB,
                read_speed: 512.0 * 1024.0,
                write_speed: 256.0 * 1024.0,
                captured_at_ms,
            },
            captured_at_ms,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    Percent,
    BytesPerSec,
}

/// User-facing metric variants. The display name is the persisted identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MetricKind {
    #[serde(rename = "CPU Total")]
    CpuTotal,
    #[serde(rename = "CPU User")]
    CpuUser,
    #[serde(rename = "CPU System")]
    CpuSystem,
    #[serde(rename = "Memory Total")]
    MemoryTotal,
    #[serde(rename = "Memory Active")]
    MemoryActive,
    #[serde(rename = "Memory Wired")]
    MemoryWired,
    #[serde(rename = "Memory Compressed")]
    MemoryCompressed,
    #[serde(rename = "Network Download")]
    NetworkDownload,
    #[serde(rename = "Network Upload")]
    NetworkUpload,
    #[serde(rename = "Storage Used")]
    StorageUsed,
    #[serde(rename = "Battery Level")]
    BatteryLevel,
    #[serde(rename = "Disk Read")]
    DiskRead,
    #[serde(rename = "Disk Write")]
    DiskWrite,
}

impl MetricKind {
    pub const ALL: [MetricKind; 13] = [
        MetricKind::CpuTotal,
        MetricKind::CpuUser,
        MetricKind::CpuSystem,
        MetricKind::MemoryTotal,
        MetricKind::MemoryActive,
        MetricKind::MemoryWired,
        MetricKind::MemoryCompressed,
        MetricKind::NetworkDownload,
        MetricKind::NetworkUpload,
        MetricKind::StorageUsed,
        MetricKind::BatteryLevel,
        MetricKind::DiskRead,
        MetricKind::DiskWrite,
    ];

    pub fn display_name(self) -> &'static str {
        match self {
            MetricKind::CpuTotal => "CPU Total",
            MetricKind::CpuUser => "CPU User",
            MetricKind::CpuSystem => "CPU System",
            MetricKind::MemoryTotal => "Memory Total",
            MetricKind::MemoryActive => "Memory Active",
            MetricKind::MemoryWired => "Memory Wired",
            MetricKind::MemoryCompressed => "Memory Compressed",
            MetricKind::NetworkDownload => "Network Download",
            MetricKind::NetworkUpload => "Network Upload",
            MetricKind::StorageUsed => "Storage Used",
            MetricKind::BatteryLevel => "Battery Level",
            MetricKind::DiskRead => "Disk Read",
            MetricKind::DiskWrite => "Disk Write",
        }
    }

    /// URL-friendly form, e.g. `cpu_total`.
    pub fn slug(self) -> String {
        self.display_name().to_lowercase().replace(' ', "_")
    }

    pub fn family(self) -> Family {
        match self {
            MetricKind::CpuTotal | MetricKind::CpuUser | MetricKind::CpuSystem => Family::Cpu,
            MetricKind::MemoryTotal
            | MetricKind::MemoryActive
            | MetricKind::MemoryWired
            | MetricKind::MemoryCompressed => Family::Memory,
            MetricKind::NetworkDownload | MetricKind::NetworkUpload => Family::Network,
            MetricKind::StorageUsed => Family::Storage,
            MetricKind::BatteryLevel => Family::Battery,
            MetricKind::DiskRead | MetricKind::DiskWrite => Family::DiskIo,
        }
    }

    pub fn unit(self) -> MetricUnit {
        match self.family() {
            Family::Network | Family::DiskIo => MetricUnit::BytesPerSec,
            _ => MetricUnit::Percent,
        }
    }

    pub fn value(self, snapshot: &Snapshot) -> f64 {
        let value = match self.family() {
            Family::Cpu => snapshot.cpu.value_of(self),
            Family::Memory => snapshot.memory.value_of(self),
            Family::Network => snapshot.network.value_of(self),
            Family::Storage => snapshot.storage.value_of(self),
            Family::Battery => snapshot.battery.value_of(self),
            Family::DiskIo => snapshot.disk_io.value_of(self),
        };
        value.unwrap_or(0.0)
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("неизвестная метрика '{0}'")]
pub struct UnknownMetric(pub String);

impl FromStr for MetricKind {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace(['_', '-'], " ");
        MetricKind::ALL
            .into_iter()
            .find(|k| k.display_name().to_lowercase() == normalized)
            .ok_or_else(|| UnknownMetric(s.to_string()))
    }
}

pub fn percent_of(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (part as f64 / total as f64) * 100.0
}

pub fn now_unix_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

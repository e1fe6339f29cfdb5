use crate::state::{
    BatteryMetrics, CpuMetrics, DiskIoMetrics, Family, MemoryMetrics, MetricKind, MetricRecord,
    NetworkMetrics, Snapshot, StorageMetrics,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Insertion-ordered FIFO that never holds more than `capacity` records.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> HistoryBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push(&mut self, item: T) {
        self.items.push_back(item);
        self.evict_overflow();
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
        self.evict_overflow();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    fn evict_overflow(&mut self) {
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
    }
}

impl<T: MetricRecord> HistoryBuffer<T> {
    pub fn values(&self, kind: MetricKind) -> Vec<f64> {
        self.items.iter().filter_map(|r| r.value_of(kind)).collect()
    }
}

/// Owned copy of every family's history, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryExport {
    pub cpu: Vec<CpuMetrics>,
    pub memory: Vec<MemoryMetrics>,
    pub network: Vec<NetworkMetrics>,
    pub storage: Vec<StorageMetrics>,
    pub battery: Vec<BatteryMetrics>,
    pub disk_io: Vec<DiskIoMetrics>,
}

#[derive(Debug, Clone)]
pub struct HistoryStore {
    cpu: HistoryBuffer<CpuMetrics>,
    memory: HistoryBuffer<MemoryMetrics>,
    network: HistoryBuffer<NetworkMetrics>,
    storage: HistoryBuffer<StorageMetrics>,
    battery: HistoryBuffer<BatteryMetrics>,
    disk_io: HistoryBuffer<DiskIoMetrics>,
}

impl HistoryStore {
    pub fn new(max_data_points: usize) -> Self {
        Self {
            cpu: HistoryBuffer::new(max_data_points),
            memory: HistoryBuffer::new(max_data_points),
            network: HistoryBuffer::new(max_data_points),
            storage: HistoryBuffer::new(max_data_points),
            battery: HistoryBuffer::new(max_data_points),
            disk_io: HistoryBuffer::new(max_data_points),
        }
    }

    /// Appends each family of `snapshot` whose variants are at least partly enabled.
    pub fn append(&mut self, snapshot: &Snapshot, enabled: &BTreeSet<MetricKind>) {
        let active: BTreeSet<Family> = enabled.iter().map(|k| k.family()).collect();
        if active.contains(&Family::Cpu) {
            self.cpu.push(snapshot.cpu.clone());
        }
        if active.contains(&Family::Memory) {
            self.memory.push(snapshot.memory.clone());
        }
        if active.contains(&Family::Network) {
            self.network.push(snapshot.network.clone());
        }
        if active.contains(&Family::Storage) {
            self.storage.push(snapshot.storage.clone());
        }
        if active.contains(&Family::Battery) {
            self.battery.push(snapshot.battery.clone());
        }
        if active.contains(&Family::DiskIo) {
            self.disk_io.push(snapshot.disk_io.clone());
        }
    }

    pub fn set_capacity(&mut self, max_data_points: usize) {
        self.cpu.set_capacity(max_data_points);
        self.memory.set_capacity(max_data_points);
        self.network.set_capacity(max_data_points);
        self.storage.set_capacity(max_data_points);
        self.battery.set_capacity(max_data_points);
        self.disk_io.set_capacity(max_data_points);
    }

    pub fn clear(&mut self) {
        self.cpu.clear();
        self.memory.clear();
        self.network.clear();
        self.storage.clear();
        self.battery.clear();
        self.disk_io.clear();
    }

    pub fn len(&self, family: Family) -> usize {
        match family {
            Family::Cpu => self.cpu.len(),
            Family::Memory => self.memory.len(),
            Family::Network => self.network.len(),
            Family::Storage => self.storage.len(),
            Family::Battery => self.battery.len(),
            Family::DiskIo => self.disk_io.len(),
        }
    }

    pub fn series(&self, kind: MetricKind) -> Vec<f64> {
        match kind.family() {
            Family::Cpu => self.cpu.values(kind),
            Family::Memory => self.memory.values(kind),
            Family::Network => self.network.values(kind),
            Family::Storage => self.storage.values(kind),
            Family::Battery => self.battery.values(kind),
            Family::DiskIo => self.disk_io.values(kind),
        }
    }

    pub fn export(&self) -> HistoryExport {
        HistoryExport {
            cpu: self.cpu.to_vec(),
            memory: self.memory.to_vec(),
            network: self.network.to_vec(),
            storage: self.storage.to_vec(),
            battery: self.battery.to_vec(),
            disk_io: self.disk_io.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu(idle: f64, ts: i64) -> CpuMetrics {
        CpuMetrics {
            user: 100.0 - idle,
            system: 0.0,
            nice: 0.0,
            idle,
            captured_at_ms: ts,
        }
    }

    #[test]
    fn buffer_keeps_only_last_n_in_insertion_order() {
        for (capacity, extra) in [(1_usize, 0_usize), (5, 0), (5, 3), (300, 301)] {
            let mut buf = HistoryBuffer::new(capacity);
            let total = capacity + extra;
            for i in 0..total {
                buf.push(i);
            }
            assert_eq!(buf.len(), capacity);
            let expected: Vec<usize> = (extra..total).collect();
            assert_eq!(buf.to_vec(), expected);
        }
    }

    #[test]
    fn shrinking_capacity_evicts_oldest() {
        let mut buf = HistoryBuffer::new(10);
        for i in 0..10 {
            buf.push(i);
        }
        buf.set_capacity(3);
        assert_eq!(buf.to_vec(), vec![7, 8, 9]);
        assert_eq!(buf.capacity(), 3);
    }

    #[test]
    fn store_only_grows_enabled_families() {
        let mut store = HistoryStore::new(10);
        let enabled: BTreeSet<MetricKind> = [MetricKind::CpuUser, MetricKind::DiskWrite]
            .into_iter()
            .collect();
        store.append(&Snapshot::zero(1), &enabled);
        store.append(&Snapshot::zero(2), &enabled);

        assert_eq!(store.len(Family::Cpu), 2);
        assert_eq!(store.len(Family::DiskIo), 2);
        assert_eq!(store.len(Family::Memory), 0);
        assert_eq!(store.len(Family::Network), 0);
        assert_eq!(store.len(Family::Storage), 0);
        assert_eq!(store.len(Family::Battery), 0);
    }

    #[test]
    fn disabling_a_family_keeps_collected_samples_until_clear() {
        let mut store = HistoryStore::new(10);
        let all: BTreeSet<MetricKind> = MetricKind::ALL.into_iter().collect();
        store.append(&Snapshot::zero(1), &all);

        let none = BTreeSet::new();
        store.append(&Snapshot::zero(2), &none);
        assert_eq!(store.len(Family::Storage), 1);

        store.clear();
        for family in Family::ALL {
            assert_eq!(store.len(family), 0);
        }
    }

    #[test]
    fn series_projects_the_requested_variant() {
        let mut store = HistoryStore::new(10);
        let enabled: BTreeSet<MetricKind> = [MetricKind::CpuTotal].into_iter().collect();
        for (i, idle) in [90.0, 75.0, 40.0].into_iter().enumerate() {
            let mut snapshot = Snapshot::zero(i as i64);
            snapshot.cpu = cpu(idle, i as i64);
            store.append(&snapshot, &enabled);
        }
        assert_eq!(store.series(MetricKind::CpuTotal), vec![10.0, 25.0, 60.0]);
        assert_eq!(store.series(MetricKind::CpuSystem), vec![0.0, 0.0, 0.0]);
        assert!(store.series(MetricKind::MemoryTotal).is_empty());

        let export = store.export();
        assert_eq!(export.cpu.len(), 3);
        assert_eq!(export.cpu[0].captured_at_ms, 0);
        assert!(export.memory.is_empty());
    }
}

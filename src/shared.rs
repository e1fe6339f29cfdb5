use crate::history::HistoryExport;
use crate::state::{Family, MetricKind, MetricRecord, Snapshot};
use crate::store::{KvStore, StoreError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

pub const CURRENT_METRICS_KEY: &str = "currentMetrics";
pub const LAST_UPDATE_KEY: &str = "lastUpdate";
pub const WIDGET_METRIC_1_KEY: &str = "widgetMetric1";
pub const WIDGET_METRIC_2_KEY: &str = "widgetMetric2";
pub const PIP_METRIC_KEY: &str = "pipMetric";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplaySelection {
    pub widget_metric_1: MetricKind,
    pub widget_metric_2: MetricKind,
    pub pip_metric: MetricKind,
}

impl Default for DisplaySelection {
    fn default() -> Self {
        Self {
            widget_metric_1: MetricKind::CpuTotal,
            widget_metric_2: MetricKind::MemoryTotal,
            pip_metric: MetricKind::CpuTotal,
        }
    }
}

/// Write side of the channel. Lives only in the sampling process.
#[derive(Debug, Clone)]
pub struct SharedWriter {
    store: KvStore,
}

impl SharedWriter {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    /// Stores the snapshot, the update time and every history slot.
    ///
    /// Each slot is written independently; a failing slot does not stop the
    /// others and the first error is returned once all were attempted.
    pub fn publish(
        &self,
        snapshot: &Snapshot,
        history: &HistoryExport,
        now_ms: i64,
    ) -> Result<(), StoreError> {
        let results = [
            self.store.put_json(CURRENT_METRICS_KEY, snapshot),
            self.store.put_json(LAST_UPDATE_KEY, &now_ms),
            self.store.put_json(Family::Cpu.history_key(), &history.cpu),
            self.store.put_json(Family::Memory.history_key(), &history.memory),
            self.store
                .put_json(Family::Network.history_key(), &history.network),
            self.store
                .put_json(Family::Storage.history_key(), &history.storage),
            self.store
                .put_json(Family::Battery.history_key(), &history.battery),
            self.store
                .put_json(Family::DiskIo.history_key(), &history.disk_io),
        ];

        let mut first_err = None;
        for result in results {
            if let Err(err) = result {
                debug!(error = %err, "слот общего хранилища не записан");
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn save_display_selection(&self, selection: &DisplaySelection) -> Result<(), StoreError> {
        self.store
            .put_json(WIDGET_METRIC_1_KEY, &selection.widget_metric_1)?;
        self.store
            .put_json(WIDGET_METRIC_2_KEY, &selection.widget_metric_2)?;
        self.store.put_json(PIP_METRIC_KEY, &selection.pip_metric)?;
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.store.remove(CURRENT_METRICS_KEY)?;
        self.store.remove(LAST_UPDATE_KEY)?;
        for family in Family::ALL {
            self.store.remove(family.history_key())?;
        }
        Ok(())
    }
}

/// Read side of the channel, used from processes that never write.
#[derive(Debug, Clone)]
pub struct SharedReader {
    store: KvStore,
}

impl SharedReader {
    pub fn new(store: KvStore) -> Self {
        Self { store }
    }

    pub fn load_current(&self) -> Option<Snapshot> {
        self.load_or_log(CURRENT_METRICS_KEY)
    }

    pub fn current_or_placeholder(&self, now_ms: i64) -> Snapshot {
        self.load_current()
            .unwrap_or_else(|| Snapshot::placeholder(now_ms))
    }

    pub fn load_history<T>(&self) -> Vec<T>
    where
        T: MetricRecord + DeserializeOwned,
    {
        self.load_or_log(T::FAMILY.history_key())
            .unwrap_or_default()
    }

    pub fn last_update_ms(&self) -> Option<i64> {
        self.load_or_log(LAST_UPDATE_KEY)
    }

    pub fn data_age(&self, now_ms: i64) -> Option<Duration> {
        let last = self.last_update_ms()?;
        Some(Duration::from_millis(now_ms.saturating_sub(last).max(0) as u64))
    }

    pub fn display_selection(&self) -> DisplaySelection {
        let defaults = DisplaySelection::default();
        DisplaySelection {
            widget_metric_1: self
                .load_or_log(WIDGET_METRIC_1_KEY)
                .unwrap_or(defaults.widget_metric_1),
            widget_metric_2: self
                .load_or_log(WIDGET_METRIC_2_KEY)
                .unwrap_or(defaults.widget_metric_2),
            pip_metric: self
                .load_or_log(PIP_METRIC_KEY)
                .unwrap_or(defaults.pip_metric),
        }
    }

    fn load_or_log<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.store.get_json(key) {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                debug!(key, "слот общего хранилища пуст");
                None
            }
            Err(err) => {
                warn!(key, error = %err, "не удалось прочитать слот общего хранилища");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStore;
    use crate::state::{CpuMetrics, MemoryMetrics};
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn open_pair(dir: &TempDir) -> (SharedWriter, SharedReader) {
        let writer = SharedWriter::new(KvStore::open(dir.path()).unwrap());
        let reader = SharedReader::new(KvStore::open(dir.path()).unwrap());
        (writer, reader)
    }

    #[test]
    fn snapshot_survives_the_round_trip() {
        let dir = TempDir::new().unwrap();
        let (writer, _) = open_pair(&dir);

        let mut snapshot = Snapshot::placeholder(1_700_000_000_123);
        snapshot.cpu.user = 12.345_678_9;
        snapshot.network.download_speed = 1234.5;
        writer
            .publish(&snapshot, &HistoryExport::default(), 1_700_000_000_200)
            .unwrap();

        let fresh = SharedReader::new(KvStore::open(dir.path()).unwrap());
        assert_eq!(fresh.load_current(), Some(snapshot));
        assert_eq!(fresh.last_update_ms(), Some(1_700_000_000_200));
    }

    #[test]
    fn missing_or_corrupt_snapshot_falls_back_to_placeholder() {
        let dir = TempDir::new().unwrap();
        let (_, reader) = open_pair(&dir);
        assert_eq!(reader.current_or_placeholder(5), Snapshot::placeholder(5));

        let store = KvStore::open(dir.path()).unwrap();
        store.put_raw(CURRENT_METRICS_KEY, b"{\"cpu\":").unwrap();
        assert_eq!(reader.load_current(), None);
        assert_eq!(reader.current_or_placeholder(6), Snapshot::placeholder(6));
    }

    #[test]
    fn histories_are_readable_per_family() {
        let dir = TempDir::new().unwrap();
        let (writer, reader) = open_pair(&dir);

        let mut history = HistoryStore::new(3);
        let enabled: BTreeSet<MetricKind> = [MetricKind::CpuTotal].into_iter().collect();
        for ts in 0..5 {
            history.append(&Snapshot::zero(ts), &enabled);
        }
        writer
            .publish(&Snapshot::zero(4), &history.export(), 4)
            .unwrap();

        let cpu: Vec<CpuMetrics> = reader.load_history();
        let memory: Vec<MemoryMetrics> = reader.load_history();
        assert_eq!(
            cpu.iter().map(|c| c.captured_at_ms).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert!(memory.is_empty());
    }

    #[test]
    fn display_selection_defaults_per_slot() {
        let dir = TempDir::new().unwrap();
        let (writer, reader) = open_pair(&dir);
        assert_eq!(reader.display_selection(), DisplaySelection::default());

        let selection = DisplaySelection {
            widget_metric_1: MetricKind::BatteryLevel,
            widget_metric_2: MetricKind::NetworkUpload,
            pip_metric: MetricKind::StorageUsed,
        };
        writer.save_display_selection(&selection).unwrap();
        assert_eq!(reader.display_selection(), selection);

        let store = KvStore::open(dir.path()).unwrap();
        store.put_raw(WIDGET_METRIC_2_KEY, b"\"GPU\"").unwrap();
        let loaded = reader.display_selection();
        assert_eq!(loaded.widget_metric_1, MetricKind::BatteryLevel);
        assert_eq!(loaded.widget_metric_2, MetricKind::MemoryTotal);
    }

    #[test]
    fn clear_all_removes_channel_slots() {
        let dir = TempDir::new().unwrap();
        let (writer, reader) = open_pair(&dir);
        writer
            .publish(&Snapshot::zero(1), &HistoryExport::default(), 1)
            .unwrap();
        writer.clear_all().unwrap();
        assert_eq!(reader.load_current(), None);
        assert_eq!(reader.last_update_ms(), None);
        assert_eq!(reader.data_age(10), None);
    }
}

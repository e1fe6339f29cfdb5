use crate::alerts::{AlertError, AlertRequest, AlertSink, ThresholdConfig, ThresholdNotifier};
use crate::collectors::CounterSource;
use crate::history::HistoryStore;
use crate::metrics::Metrics;
use crate::scheduler::{SchedulerError, Ticker};
use crate::settings::{Settings, SettingsError, SettingsManager};
use crate::shared::SharedWriter;
use crate::state::{now_unix_ms, Family, MetricKind, Snapshot};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{watch, Mutex as AsyncMutex, RwLock};
use tracing::{debug, error, info, warn};

pub struct MonitorState {
    pub current: Snapshot,
    pub history: HistoryStore,
    pub started_at_unix: i64,
}

/// Drives sampling and fans every snapshot out to history, the shared
/// store, the notifier and live subscribers, in that order.
pub struct Monitor {
    source: Arc<Mutex<Box<dyn CounterSource>>>,
    state: RwLock<MonitorState>,
    settings: Arc<SettingsManager>,
    shared: SharedWriter,
    notifier: AsyncMutex<ThresholdNotifier>,
    sinks: Vec<Arc<dyn AlertSink>>,
    metrics: Arc<Metrics>,
    updates: watch::Sender<Snapshot>,
    ticker: Mutex<Ticker>,
}

impl Monitor {
    pub async fn new(
        source: Box<dyn CounterSource>,
        settings: Arc<SettingsManager>,
        shared: SharedWriter,
        notifier: ThresholdNotifier,
        sinks: Vec<Arc<dyn AlertSink>>,
        metrics: Arc<Metrics>,
    ) -> Arc<Self> {
        let now_ms = now_unix_ms();
        let max_points = settings.get().await.max_data_points;
        let (updates, _) = watch::channel(Snapshot::zero(now_ms));
        Arc::new(Self {
            source: Arc::new(Mutex::new(source)),
            state: RwLock::new(MonitorState {
                current: Snapshot::zero(now_ms),
                history: HistoryStore::new(max_points),
                started_at_unix: now_ms / 1000,
            }),
            settings,
            shared,
            notifier: AsyncMutex::new(notifier),
            sinks,
            metrics,
            updates,
            ticker: Mutex::new(Ticker::new()),
        })
    }

    /// (Re)arms sampling with the interval currently in settings and collects immediately.
    pub async fn start(self: &Arc<Self>) -> Result<(), SchedulerError> {
        let period = self.settings.get().await.refresh_interval();
        let weak = Arc::downgrade(self);
        self.lock_ticker().start(period, move |_| {
            let weak = weak.clone();
            async move {
                if let Some(monitor) = weak.upgrade() {
                    monitor.collect_once().await;
                }
            }
        })?;
        info!(interval_secs = period.as_secs(), "мониторинг запущен");
        Ok(())
    }

    pub fn stop(&self) {
        let mut ticker = self.lock_ticker();
        if ticker.is_running() {
            ticker.stop();
            info!("мониторинг остановлен");
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_ticker().is_running()
    }

    /// Reads every counter family off the async workers, then publishes.
    pub async fn collect_once(&self) {
        let source = self.source.clone();
        let read = tokio::task::spawn_blocking(move || {
            let mut source = source.lock().unwrap_or_else(PoisonError::into_inner);
            let snapshot = source.read_all();
            (snapshot, source.take_failures())
        })
        .await;

        match read {
            Ok((snapshot, failures)) => {
                for family in failures {
                    self.metrics.inc_collect_error(family);
                }
                self.publish(snapshot).await;
            }
            Err(err) => {
                error!(error = %err, "чтение счётчиков завершилось с ошибкой");
            }
        }
    }

    pub async fn publish(&self, snapshot: Snapshot) {
        let (export, lengths, started_at_unix) = {
            let mut state = self.state.write().await;
            let settings = self.settings.get().await;
            state.history.set_capacity(settings.max_data_points);
            state.history.append(&snapshot, &settings.enabled_metrics);
            state.current = snapshot.clone();
            let lengths = Family::ALL.map(|f| (f, state.history.len(f)));
            (state.history.export(), lengths, state.started_at_unix)
        };

        let shared = self.shared.clone();
        let written = snapshot.clone();
        let write = tokio::task::spawn_blocking(move || {
            shared.publish(&written, &export, now_unix_ms())
        })
        .await;
        match write {
            Ok(Ok(())) => self.metrics.inc_shared_write("ok"),
            Ok(Err(err)) => {
                self.metrics.inc_shared_write("error");
                warn!(error = %err, "не удалось записать снимок в общее хранилище");
            }
            Err(err) => {
                self.metrics.inc_shared_write("error");
                error!(error = %err, "запись в общее хранилище завершилась с ошибкой");
            }
        }

        self.metrics.update_from_snapshot(&snapshot, started_at_unix);
        for (family, len) in lengths {
            self.metrics.set_history_length(family, len);
        }

        let alerts = self
            .notifier
            .lock()
            .await
            .evaluate(&snapshot, snapshot.captured_at_ms / 1000);
        for alert in &alerts {
            self.dispatch(alert);
        }

        self.updates.send_replace(snapshot);
    }

    fn dispatch(&self, alert: &AlertRequest) {
        let mut delivered = false;
        for sink in &self.sinks {
            match sink.deliver(alert) {
                Ok(()) => delivered = true,
                Err(err) => {
                    warn!(sink = sink.name(), identifier = %alert.identifier, error = %err, "уведомление не доставлено");
                }
            }
        }
        if delivered {
            self.metrics.inc_alert_sent(alert.metric.as_str());
        }
    }

    pub async fn current_snapshot(&self) -> Snapshot {
        self.state.read().await.current.clone()
    }

    pub async fn started_at_unix(&self) -> i64 {
        self.state.read().await.started_at_unix
    }

    pub async fn history(&self, kind: MetricKind) -> Vec<f64> {
        self.state.read().await.history.series(kind)
    }

    pub async fn history_len(&self, family: Family) -> usize {
        self.state.read().await.history.len(family)
    }

    pub async fn clear_history(&self) {
        self.state.write().await.history.clear();
        for family in Family::ALL {
            self.metrics.set_history_length(family, 0);
        }
        debug!("история очищена");
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.updates.subscribe()
    }

    /// Persists a settings change and trims history to the new capacity at once.
    pub async fn update_settings<F>(&self, mutate: F) -> Result<Settings, SettingsError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut state = self.state.write().await;
        let saved = self.settings.update(mutate).await?;
        state.history.set_capacity(saved.max_data_points);
        for family in Family::ALL {
            self.metrics.set_history_length(family, state.history.len(family));
        }
        Ok(saved)
    }

    pub fn settings(&self) -> &Arc<SettingsManager> {
        &self.settings
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    pub async fn thresholds(&self) -> ThresholdConfig {
        self.notifier.lock().await.state().config.clone()
    }

    pub async fn update_thresholds(
        &self,
        config: ThresholdConfig,
    ) -> Result<ThresholdConfig, AlertError> {
        let mut notifier = self.notifier.lock().await;
        notifier.update_thresholds(config)?;
        Ok(notifier.state().config.clone())
    }

    fn lock_ticker(&self) -> MutexGuard<'_, Ticker> {
        self.ticker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::alerts::ThresholdState;
    use crate::shared::SharedReader;
    use crate::state::{
        BatteryMetrics, CpuMetrics, DiskIoMetrics, MemoryMetrics, MetricRecord, NetworkMetrics,
        StorageMetrics,
    };
    use crate::store::KvStore;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    /// Deterministic counters: CPU at `cpu_usage` percent, memory 90% used.
    pub(crate) struct FakeSource {
        pub cpu_usage: f64,
    }

    impl CounterSource for FakeSource {
        fn read_cpu(&mut self) -> CpuMetrics {
            CpuMetrics {
                user: self.cpu_usage,
                system: 0.0,
                nice: 0.0,
                idle: 100.0 - self.cpu_usage,
                captured_at_ms: now_unix_ms(),
            }
        }

        fn read_memory(&mut self) -> MemoryMetrics {
            let mut mem = MemoryMetrics::zero(now_unix_ms());
            mem.total = 1000;
            mem.used = 900;
            mem.active = 900;
            mem
        }

        fn read_network(&mut self) -> NetworkMetrics {
            NetworkMetrics::zero(now_unix_ms())
        }

        fn read_storage(&mut self) -> StorageMetrics {
            StorageMetrics::zero(now_unix_ms())
        }

        fn read_battery(&mut self) -> BatteryMetrics {
            BatteryMetrics::zero(now_unix_ms())
        }

        fn read_disk_io(&mut self) -> DiskIoMetrics {
            DiskIoMetrics::zero(now_unix_ms())
        }
    }

    #[derive(Default)]
    pub(crate) struct CountingSink {
        pub delivered: AtomicUsize,
    }

    impl AlertSink for CountingSink {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn deliver(&self, _request: &AlertRequest) -> Result<(), AlertError> {
            self.delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    pub(crate) struct Fixture {
        pub _app: TempDir,
        pub shared: TempDir,
        pub monitor: Arc<Monitor>,
        pub sink: Arc<CountingSink>,
    }

    pub(crate) async fn fixture(cpu_usage: f64) -> Fixture {
        let app = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        let writer = SharedWriter::new(KvStore::open(shared.path()).unwrap());
        let settings = Arc::new(SettingsManager::load(
            KvStore::open(app.path()).unwrap(),
            writer.clone(),
        ));
        let sink = Arc::new(CountingSink::default());
        let monitor = Monitor::new(
            Box::new(FakeSource { cpu_usage }),
            settings,
            writer,
            ThresholdNotifier::new(ThresholdState::default()),
            vec![sink.clone() as Arc<dyn AlertSink>],
            Metrics::new().unwrap(),
        )
        .await;
        Fixture {
            _app: app,
            shared,
            monitor,
            sink,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn only_enabled_families_accumulate_history() {
        let fx = fixture(20.0).await;
        fx.monitor
            .settings()
            .update(|s| {
                s.enabled_metrics = [MetricKind::CpuTotal, MetricKind::MemoryTotal]
                    .into_iter()
                    .collect::<BTreeSet<_>>();
                s.refresh_interval_secs = 1;
            })
            .await
            .unwrap();

        fx.monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        fx.monitor.stop();

        assert_eq!(fx.monitor.history_len(Family::Cpu).await, 4);
        assert_eq!(fx.monitor.history_len(Family::Memory).await, 4);
        assert_eq!(fx.monitor.history_len(Family::Network).await, 0);
        assert_eq!(fx.monitor.history_len(Family::Storage).await, 0);
        assert_eq!(fx.monitor.history(MetricKind::CpuTotal).await, vec![20.0; 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_prevents_further_samples() {
        let fx = fixture(20.0).await;
        fx.monitor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(1500)).await;
        fx.monitor.stop();
        assert!(!fx.monitor.is_running());
        let seen = fx.monitor.history_len(Family::Cpu).await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(fx.monitor.history_len(Family::Cpu).await, seen);
    }

    #[tokio::test]
    async fn publish_reaches_shared_store_and_subscribers() {
        let fx = fixture(30.0).await;
        let mut rx = fx.monitor.subscribe();

        fx.monitor.collect_once().await;

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert!((seen.cpu.usage() - 30.0).abs() < 1e-9);

        let reader = SharedReader::new(KvStore::open(fx.shared.path()).unwrap());
        assert_eq!(reader.load_current(), Some(seen));
        assert_eq!(reader.load_history::<CpuMetrics>().len(), 1);
        assert!(reader.last_update_ms().is_some());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn shared_write_yields_to_other_tasks() {
        let fx = fixture(30.0).await;
        let ran = Arc::new(AtomicUsize::new(0));
        let observed = ran.clone();
        tokio::spawn(async move {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        fx.monitor.publish(Snapshot::zero(now_unix_ms())).await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        let reader = SharedReader::new(KvStore::open(fx.shared.path()).unwrap());
        assert!(reader.load_current().is_some());
    }

    #[tokio::test]
    async fn threshold_crossing_is_delivered_once_per_cooldown() {
        let fx = fixture(95.0).await;
        fx.monitor.collect_once().await;
        fx.monitor.collect_once().await;
        // cpu_high and memory_high on the first sample only
        assert_eq!(fx.sink.delivered.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn lowering_max_points_trims_history_immediately() {
        let fx = fixture(10.0).await;
        for _ in 0..10 {
            fx.monitor.collect_once().await;
        }
        assert_eq!(fx.monitor.history_len(Family::Cpu).await, 10);

        let saved = fx
            .monitor
            .update_settings(|s| s.max_data_points = 3)
            .await
            .unwrap();
        assert_eq!(saved.max_data_points, 3);
        for family in Family::ALL {
            assert!(fx.monitor.history_len(family).await <= 3);
        }
        assert_eq!(fx.monitor.history(MetricKind::CpuTotal).await.len(), 3);

        let err = fx
            .monitor
            .update_settings(|s| s.max_data_points = 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SettingsError::Validation(_)));
        assert_eq!(fx.monitor.history_len(Family::Cpu).await, 3);
    }

    #[tokio::test]
    async fn clear_history_empties_every_family() {
        let fx = fixture(10.0).await;
        fx.monitor.collect_once().await;
        assert_eq!(fx.monitor.history_len(Family::Battery).await, 1);

        fx.monitor.clear_history().await;
        for family in Family::ALL {
            assert_eq!(fx.monitor.history_len(family).await, 0);
        }
    }
}

use crate::state::{Family, MetricKind, Snapshot};
use prometheus::core::Collector;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub activityd_metric_value: GaugeVec,
    pub activityd_memory_used_bytes: Gauge,
    pub activityd_memory_total_bytes: Gauge,
    pub activityd_storage_used_bytes: Gauge,
    pub activityd_storage_total_bytes: Gauge,
    pub activityd_net_rx_bytes_total: Gauge,
    pub activityd_net_tx_bytes_total: Gauge,
    pub activityd_disk_read_bytes_total: Gauge,
    pub activityd_disk_written_bytes_total: Gauge,
    pub activityd_battery_level_percent: Gauge,
    pub activityd_history_length: GaugeVec,
    pub activityd_uptime_seconds: Gauge,
    pub activityd_scrape_count_total: Counter,
    pub activityd_collect_errors_total: CounterVec,
    pub activityd_alerts_sent_total: CounterVec,
    pub activityd_pip_frames_total: CounterVec,
    pub activityd_shared_writes_total: CounterVec,
    pub activityd_last_collect_timestamp_seconds: Gauge,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let activityd_metric_value = GaugeVec::new(
            opts!(
                "activityd_metric_value",
                "Present value of each metric variant (percent or bytes per second)"
            ),
            &["metric"],
        )?;
        let activityd_memory_used_bytes =
            Gauge::with_opts(opts!("activityd_memory_used_bytes", "Used memory in bytes"))?;
        let activityd_memory_total_bytes = Gauge::with_opts(opts!(
            "activityd_memory_total_bytes",
            "Total memory in bytes"
        ))?;
        let activityd_storage_used_bytes = Gauge::with_opts(opts!(
            "activityd_storage_used_bytes",
            "Used bytes on the app storage volume"
        ))?;
        let activityd_storage_total_bytes = Gauge::with_opts(opts!(
            "activityd_storage_total_bytes",
            "Capacity of the app storage volume in bytes"
        ))?;
        let activityd_net_rx_bytes_total = Gauge::with_opts(opts!(
            "activityd_net_rx_bytes_total",
            "Cumulative received bytes over non-loopback interfaces"
        ))?;
        let activityd_net_tx_bytes_total = Gauge::with_opts(opts!(
            "activityd_net_tx_bytes_total",
            "Cumulative transmitted bytes over non-loopback interfaces"
        ))?;
        let activityd_disk_read_bytes_total = Gauge::with_opts(opts!(
            "activityd_disk_read_bytes_total",
            "Cumulative paged-in bytes"
        ))?;
        let activityd_disk_written_bytes_total = Gauge::with_opts(opts!(
            "activityd_disk_written_bytes_total",
            "Cumulative paged-out bytes"
        ))?;
        let activityd_battery_level_percent = Gauge::with_opts(opts!(
            "activityd_battery_level_percent",
            "Battery charge level in percent"
        ))?;
        let activityd_history_length = GaugeVec::new(
            opts!(
                "activityd_history_length",
                "Number of records kept in each family's history"
            ),
            &["family"],
        )?;
        let activityd_uptime_seconds = Gauge::with_opts(opts!(
            "activityd_uptime_seconds",
            "Seconds since the daemon started"
        ))?;
        let activityd_scrape_count_total = Counter::with_opts(opts!(
            "activityd_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let activityd_collect_errors_total = CounterVec::new(
            opts!(
                "activityd_collect_errors_total",
                "Counter reads that fell back to a zero record, by family"
            ),
            &["family"],
        )?;
        let activityd_alerts_sent_total = CounterVec::new(
            opts!(
                "activityd_alerts_sent_total",
                "Threshold alerts handed to delivery, by metric"
            ),
            &["metric"],
        )?;
        let activityd_pip_frames_total = CounterVec::new(
            opts!(
                "activityd_pip_frames_total",
                "Picture-in-Picture frames by outcome"
            ),
            &["outcome"],
        )?;
        let activityd_shared_writes_total = CounterVec::new(
            opts!(
                "activityd_shared_writes_total",
                "Publications to the shared store by outcome"
            ),
            &["outcome"],
        )?;
        let activityd_last_collect_timestamp_seconds = Gauge::with_opts(opts!(
            "activityd_last_collect_timestamp_seconds",
            "Unix time of the last published snapshot"
        ))?;

        register(&registry, &activityd_metric_value)?;
        register(&registry, &activityd_memory_used_bytes)?;
        register(&registry, &activityd_memory_total_bytes)?;
        register(&registry, &activityd_storage_used_bytes)?;
        register(&registry, &activityd_storage_total_bytes)?;
        register(&registry, &activityd_net_rx_bytes_total)?;
        register(&registry, &activityd_net_tx_bytes_total)?;
        register(&registry, &activityd_disk_read_bytes_total)?;
        register(&registry, &activityd_disk_written_bytes_total)?;
        register(&registry, &activityd_battery_level_percent)?;
        register(&registry, &activityd_history_length)?;
        register(&registry, &activityd_uptime_seconds)?;
        register(&registry, &activityd_scrape_count_total)?;
        register(&registry, &activityd_collect_errors_total)?;
        register(&registry, &activityd_alerts_sent_total)?;
        register(&registry, &activityd_pip_frames_total)?;
        register(&registry, &activityd_shared_writes_total)?;
        register(&registry, &activityd_last_collect_timestamp_seconds)?;

        Ok(Arc::new(Self {
            registry,
            activityd_metric_value,
            activityd_memory_used_bytes,
            activityd_memory_total_bytes,
            activityd_storage_used_bytes,
            activityd_storage_total_bytes,
            activityd_net_rx_bytes_total,
            activityd_net_tx_bytes_total,
            activityd_disk_read_bytes_total,
            activityd_disk_written_bytes_total,
            activityd_battery_level_percent,
            activityd_history_length,
            activityd_uptime_seconds,
            activityd_scrape_count_total,
            activityd_collect_errors_total,
            activityd_alerts_sent_total,
            activityd_pip_frames_total,
            activityd_shared_writes_total,
            activityd_last_collect_timestamp_seconds,
        }))
    }

    pub fn update_from_snapshot(&self, snapshot: &Snapshot, started_at_unix: i64) {
        for kind in MetricKind::ALL {
            let slug = kind.slug();
            self.activityd_metric_value
                .with_label_values(&[slug.as_str()])
                .set(kind.value(snapshot));
        }

        self.activityd_memory_used_bytes
            .set(snapshot.memory.used as f64);
        self.activityd_memory_total_bytes
            .set(snapshot.memory.total as f64);
        self.activityd_storage_used_bytes
            .set(snapshot.storage.used as f64);
        self.activityd_storage_total_bytes
            .set(snapshot.storage.total as f64);
        self.activityd_net_rx_bytes_total
            .set(snapshot.network.bytes_received as f64);
        self.activityd_net_tx_bytes_total
            .set(snapshot.network.bytes_sent as f64);
        self.activityd_disk_read_bytes_total
            .set(snapshot.disk_io.bytes_read as f64);
        self.activityd_disk_written_bytes_total
            .set(snapshot.disk_io.bytes_written as f64);
        self.activityd_battery_level_percent
            .set(snapshot.battery.level);

        self.activityd_last_collect_timestamp_seconds
            .set((snapshot.captured_at_ms / 1000) as f64);
        let uptime = now_unix().saturating_sub(started_at_unix) as f64;
        self.activityd_uptime_seconds.set(uptime.max(0.0));
    }

    pub fn set_history_length(&self, family: Family, len: usize) {
        self.activityd_history_length
            .with_label_values(&[family.as_str()])
            .set(len as f64);
    }

    pub fn inc_scrape_count(&self) {
        self.activityd_scrape_count_total.inc();
    }

    pub fn inc_collect_error(&self, family: Family) {
        self.activityd_collect_errors_total
            .with_label_values(&[family.as_str()])
            .inc();
    }

    pub fn inc_alert_sent(&self, metric: &str) {
        self.activityd_alerts_sent_total
            .with_label_values(&[metric])
            .inc();
    }

    pub fn inc_pip_frame(&self, outcome: &str) {
        self.activityd_pip_frames_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_shared_write(&self, outcome: &str) {
        self.activityd_shared_writes_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn encode_metrics(&self) -> Result<Vec<u8>, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        Ok(buf)
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

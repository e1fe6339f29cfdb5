use crate::state::Snapshot;
use crate::store::{KvStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

pub const NOTIFICATION_STATE_KEY: &str = "notification_state";
pub const ALERT_CATEGORY: &str = "METRIC_ALERT";

#[derive(Debug, Error)]
pub enum AlertError {
    #[error("нет активного рантайма tokio для отправки уведомления")]
    NoRuntime,
    #[error("уведомление отклонено: {0}")]
    Rejected(String),
    #[error("некорректные пороги: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertMetric {
    Cpu,
    Memory,
    Storage,
}

impl AlertMetric {
    pub const ALL: [AlertMetric; 3] = [AlertMetric::Cpu, AlertMetric::Memory, AlertMetric::Storage];

    pub fn identifier(self) -> &'static str {
        match self {
            AlertMetric::Cpu => "cpu_high",
            AlertMetric::Memory => "memory_high",
            AlertMetric::Storage => "storage_high",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AlertMetric::Cpu => "cpu",
            AlertMetric::Memory => "memory",
            AlertMetric::Storage => "storage",
        }
    }

    fn value(self, snapshot: &Snapshot) -> f64 {
        match self {
            AlertMetric::Cpu => snapshot.cpu.usage(),
            AlertMetric::Memory => snapshot.memory.usage_percentage(),
            AlertMetric::Storage => snapshot.storage.usage_percentage(),
        }
    }

    fn title(self) -> &'static str {
        match self {
            AlertMetric::Cpu => "Высокая загрузка CPU",
            AlertMetric::Memory => "Высокое потребление памяти",
            AlertMetric::Storage => "Мало места в хранилище",
        }
    }

    fn body(self, value: f64) -> String {
        match self {
            AlertMetric::Cpu => format!("CPU загружен на {value:.0}%"),
            AlertMetric::Memory => format!("Память занята на {value:.0}%"),
            AlertMetric::Storage => format!("Хранилище заполнено на {value:.0}%"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub limit_percent: f64,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    pub cpu: Threshold,
    pub memory: Threshold,
    pub storage: Threshold,
    pub cooldown_secs: u64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu: Threshold {
                limit_percent: 80.0,
                enabled: true,
            },
            memory: Threshold {
                limit_percent: 85.0,
                enabled: true,
            },
            storage: Threshold {
                limit_percent: 90.0,
                enabled: true,
            },
            cooldown_secs: 300,
        }
    }
}

impl ThresholdConfig {
    pub fn get(&self, metric: AlertMetric) -> Threshold {
        match metric {
            AlertMetric::Cpu => self.cpu,
            AlertMetric::Memory => self.memory,
            AlertMetric::Storage => self.storage,
        }
    }

    pub fn validate(&self) -> Result<(), AlertError> {
        for metric in AlertMetric::ALL {
            let limit = self.get(metric).limit_percent;
            if !(0.0..=100.0).contains(&limit) {
                return Err(AlertError::Validation(format!(
                    "порог {} должен быть в диапазоне 0..100",
                    metric.as_str()
                )));
            }
        }
        Ok(())
    }
}

/// Persisted notifier state: thresholds plus the last alert time per identifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdState {
    #[serde(flatten)]
    pub config: ThresholdConfig,
    #[serde(default)]
    pub last_alert_at: HashMap<String, i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertRequest {
    pub identifier: String,
    pub title: String,
    pub body: String,
    pub category: String,
    pub metric: AlertMetric,
    pub value: f64,
}

/// User response to a delivered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertAction {
    Open,
    Dismiss,
}

impl AlertAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertAction::Open => "open",
            AlertAction::Dismiss => "dismiss",
        }
    }

    /// Splits `action:identifier` callback data.
    pub fn parse_callback(data: &str) -> Option<(AlertAction, &str)> {
        let (action, identifier) = data.split_once(':')?;
        let action = action.parse().ok()?;
        if identifier.is_empty() {
            return None;
        }
        Some((action, identifier))
    }

    pub fn callback_data(self, identifier: &str) -> String {
        format!("{}:{identifier}", self.as_str())
    }
}

impl fmt::Display for AlertAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertAction {
    type Err = AlertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" | "open_app" => Ok(AlertAction::Open),
            "dismiss" => Ok(AlertAction::Dismiss),
            other => Err(AlertError::Rejected(format!("неизвестное действие '{other}'"))),
        }
    }
}

/// Fire-and-forget delivery of alert requests.
pub trait AlertSink: Send + Sync {
    fn name(&self) -> &'static str;
    fn deliver(&self, request: &AlertRequest) -> Result<(), AlertError>;
}

pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver(&self, request: &AlertRequest) -> Result<(), AlertError> {
        warn!(
            identifier = %request.identifier,
            category = %request.category,
            value = request.value,
            "{}: {}",
            request.title,
            request.body
        );
        Ok(())
    }
}

pub struct ThresholdNotifier {
    state: ThresholdState,
    store: Option<KvStore>,
}

impl ThresholdNotifier {
    pub fn new(state: ThresholdState) -> Self {
        Self { state, store: None }
    }

    /// Restores persisted state, falling back to defaults on a miss or decode failure.
    pub fn load(store: KvStore) -> Self {
        let state = match store.get_json::<ThresholdState>(NOTIFICATION_STATE_KEY) {
            Ok(Some(state)) => state,
            Ok(None) => ThresholdState::default(),
            Err(err) => {
                warn!(error = %err, "не удалось загрузить состояние уведомлений, используются значения по умолчанию");
                ThresholdState::default()
            }
        };
        Self {
            state,
            store: Some(store),
        }
    }

    pub fn state(&self) -> &ThresholdState {
        &self.state
    }

    pub fn update_thresholds(&mut self, config: ThresholdConfig) -> Result<(), AlertError> {
        config.validate()?;
        self.state.config = config;
        if let Some(store) = &self.store {
            store.put_json(NOTIFICATION_STATE_KEY, &self.state)?;
        }
        info!("пороги уведомлений обновлены");
        Ok(())
    }

    /// Alerts due for `snapshot`. Each emitted identifier starts a new cooldown window.
    pub fn evaluate(&mut self, snapshot: &Snapshot, now_unix: i64) -> Vec<AlertRequest> {
        let cooldown = self.state.config.cooldown_secs as i64;
        let mut out = Vec::new();

        for metric in AlertMetric::ALL {
            let threshold = self.state.config.get(metric);
            if !threshold.enabled {
                continue;
            }
            let value = metric.value(snapshot);
            if value >= threshold.limit_percent
                && should_emit(
                    metric.identifier(),
                    now_unix,
                    cooldown,
                    &mut self.state.last_alert_at,
                )
            {
                out.push(AlertRequest {
                    identifier: metric.identifier().to_string(),
                    title: metric.title().to_string(),
                    body: metric.body(value),
                    category: ALERT_CATEGORY.to_string(),
                    metric,
                    value,
                });
            }
        }

        if !out.is_empty() {
            self.persist();
        }
        out
    }

    fn persist(&self) {
        if let Some(store) = &self.store {
            if let Err(err) = store.put_json(NOTIFICATION_STATE_KEY, &self.state) {
                warn!(error = %err, "не удалось сохранить состояние уведомлений");
            }
        }
    }
}

fn should_emit(
    key: &str,
    now_unix: i64,
    cooldown_secs: i64,
    last_sent: &mut HashMap<String, i64>,
) -> bool {
    if let Some(last) = last_sent.get(key) {
        if now_unix - *last < cooldown_secs {
            return false;
        }
    }
    last_sent.insert(key.to_string(), now_unix);
    true
}

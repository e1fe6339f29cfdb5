use crate::shared::{DisplaySelection, SharedWriter};
use crate::state::{Family, MetricKind};
use crate::store::{KvStore, StoreError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};

pub const SETTINGS_KEY: &str = "app_settings";
pub const MAX_DATA_POINTS_LIMIT: usize = 86_400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    Light,
    Dark,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_enabled_metrics")]
    pub enabled_metrics: BTreeSet<MetricKind>,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_max_data_points")]
    pub max_data_points: usize,
    #[serde(default = "default_widget_metric_1")]
    pub widget_metric_1: MetricKind,
    #[serde(default = "default_widget_metric_2")]
    pub widget_metric_2: MetricKind,
    #[serde(default = "default_pip_metric")]
    pub pip_metric: MetricKind,
    #[serde(default = "default_theme")]
    pub theme: Theme,
    #[serde(default = "default_haptics_enabled")]
    pub haptics_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled_metrics: default_enabled_metrics(),
            refresh_interval_secs: default_refresh_interval_secs(),
            max_data_points: default_max_data_points(),
            widget_metric_1: default_widget_metric_1(),
            widget_metric_2: default_widget_metric_2(),
            pip_metric: default_pip_metric(),
            theme: default_theme(),
            haptics_enabled: default_haptics_enabled(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("ошибка валидации настроек: {0}")]
    Validation(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Settings {
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.refresh_interval_secs < 1 {
            return Err(SettingsError::Validation(
                "refresh_interval_secs должно быть >= 1".to_string(),
            ));
        }
        if !(1..=MAX_DATA_POINTS_LIMIT).contains(&self.max_data_points) {
            return Err(SettingsError::Validation(format!(
                "max_data_points должно быть в диапазоне 1..{MAX_DATA_POINTS_LIMIT}"
            )));
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn is_metric_enabled(&self, kind: MetricKind) -> bool {
        self.enabled_metrics.contains(&kind)
    }

    pub fn is_family_enabled(&self, family: Family) -> bool {
        self.enabled_metrics.iter().any(|k| k.family() == family)
    }

    pub fn toggle_metric(&mut self, kind: MetricKind) {
        if !self.enabled_metrics.remove(&kind) {
            self.enabled_metrics.insert(kind);
        }
    }

    pub fn display_selection(&self) -> DisplaySelection {
        DisplaySelection {
            widget_metric_1: self.widget_metric_1,
            widget_metric_2: self.widget_metric_2,
            pip_metric: self.pip_metric,
        }
    }
}

/// Owns the process-wide settings: loaded once, persisted on every change.
pub struct SettingsManager {
    store: KvStore,
    shared: SharedWriter,
    current: RwLock<Settings>,
}

impl SettingsManager {
    pub fn load(store: KvStore, shared: SharedWriter) -> Self {
        let settings = match store.get_json::<Settings>(SETTINGS_KEY) {
            Ok(Some(s)) => match s.validate() {
                Ok(()) => s,
                Err(err) => {
                    warn!(error = %err, "сохранённые настройки некорректны, используются значения по умолчанию");
                    Settings::default()
                }
            },
            Ok(None) => {
                info!("сохранённых настроек нет, используются значения по умолчанию");
                Settings::default()
            }
            Err(err) => {
                warn!(error = %err, "не удалось загрузить настройки, используются значения по умолчанию");
                Settings::default()
            }
        };

        if let Err(err) = shared.save_display_selection(&settings.display_selection()) {
            warn!(error = %err, "не удалось передать выбор метрик в общее хранилище");
        }

        Self {
            store,
            shared,
            current: RwLock::new(settings),
        }
    }

    pub async fn get(&self) -> Settings {
        self.current.read().await.clone()
    }

    /// Applies `mutate` to a copy, validates and persists it, then swaps it in.
    pub async fn update<F>(&self, mutate: F) -> Result<Settings, SettingsError>
    where
        F: FnOnce(&mut Settings),
    {
        let mut guard = self.current.write().await;
        let mut next = guard.clone();
        mutate(&mut next);
        next.validate()?;
        self.store.put_json(SETTINGS_KEY, &next)?;

        if guard.display_selection() != next.display_selection() {
            if let Err(err) = self.shared.save_display_selection(&next.display_selection()) {
                warn!(error = %err, "не удалось передать выбор метрик в общее хранилище");
            }
        }

        *guard = next.clone();
        Ok(next)
    }
}

fn default_enabled_metrics() -> BTreeSet<MetricKind> {
    MetricKind::ALL.into_iter().collect()
}

const fn default_refresh_interval_secs() -> u64 {
    1
}

const fn default_max_data_points() -> usize {
    300
}

const fn default_widget_metric_1() -> MetricKind {
    MetricKind::CpuTotal
}

const fn default_widget_metric_2() -> MetricKind {
    MetricKind::MemoryTotal
}

const fn default_pip_metric() -> MetricKind {
    MetricKind::CpuTotal
}

const fn default_theme() -> Theme {
    Theme::System
}

const fn default_haptics_enabled() -> bool {
    true
}

use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub listen: String,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub pip: PipConfig,
    #[serde(default)]
    pub telegram: TelegramConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Private store: settings blob and threshold state.
    #[serde(default = "default_app_dir")]
    pub app_dir: PathBuf,
    /// Store shared with reader processes.
    #[serde(default = "default_shared_dir")]
    pub shared_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipConfig {
    #[serde(default = "default_pip_enabled")]
    pub enabled: bool,
    #[serde(default = "default_retained_frames")]
    pub retained_frames: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_bot_token_env")]
    pub bot_token_env: String,
    #[serde(default)]
    pub bot_token: Option<String>,
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            app_dir: default_app_dir(),
            shared_dir: default_shared_dir(),
        }
    }
}

impl Default for PipConfig {
    fn default() -> Self {
        Self {
            enabled: default_pip_enabled(),
            retained_frames: default_retained_frames(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token_env: default_bot_token_env(),
            bot_token: None,
            allowed_chat_ids: Vec::new(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("не удалось прочитать файл конфигурации {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("не удалось разобрать YAML в {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("ошибка валидации конфигурации: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation(
                "поле listen обязательно".to_string(),
            ));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "поле listen должно быть корректным адресом host:port".to_string(),
            ));
        }

        validate_storage(&self.storage)?;
        validate_pip(&self.pip)?;
        validate_telegram(&self.telegram)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_storage(cfg: &StorageConfig) -> Result<(), ConfigError> {
    if cfg.app_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "storage.app_dir не должен быть пустым".to_string(),
        ));
    }
    if cfg.shared_dir.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "storage.shared_dir не должен быть пустым".to_string(),
        ));
    }
    if cfg.app_dir == cfg.shared_dir {
        return Err(ConfigError::Validation(
            "storage.app_dir и storage.shared_dir должны различаться".to_string(),
        ));
    }
    Ok(())
}

fn validate_pip(cfg: &PipConfig) -> Result<(), ConfigError> {
    if cfg.retained_frames < 1 {
        return Err(ConfigError::Validation(
            "pip.retained_frames должно быть >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_telegram(cfg: &TelegramConfig) -> Result<(), ConfigError> {
    if cfg.rate_limit_per_minute < 1 {
        return Err(ConfigError::Validation(
            "telegram.rate_limit_per_minute должно быть >= 1".to_string(),
        ));
    }
    Ok(())
}

fn default_app_dir() -> PathBuf {
    PathBuf::from("./data/app")
}

fn default_shared_dir() -> PathBuf {
    PathBuf::from("./data/shared")
}

const fn default_pip_enabled() -> bool {
    true
}

const fn default_retained_frames() -> usize {
    3
}

fn default_bot_token_env() -> String {
    "TELEGRAM_BOT_TOKEN".to_string()
}

const fn default_rate_limit_per_minute() -> u32 {
    30
}

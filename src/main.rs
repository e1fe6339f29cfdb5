mod alerts;
mod collectors;
mod config;
mod format;
mod history;
mod http;
mod metrics;
mod monitor;
mod pip;
mod scheduler;
mod settings;
mod shared;
mod state;
mod store;
mod telegram;

use alerts::{AlertSink, LogSink, ThresholdNotifier};
use axum::serve;
use clap::Parser;
use collectors::system::SystemCounters;
use config::Config;
use metrics::Metrics;
use monitor::Monitor;
use pip::render::RasterRenderer;
use pip::PipController;
use settings::SettingsManager;
use shared::{SharedReader, SharedWriter};
use state::now_unix_ms;
use std::net::SocketAddr;
use std::sync::Arc;
use store::KvStore;
use teloxide::Bot;
use telegram::TelegramSink;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "activityd")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long, conflicts_with = "telegram_off")]
    telegram_on: bool,
    #[arg(long, conflicts_with = "telegram_on")]
    telegram_off: bool,
    /// Print what a reader process sees in the shared store and exit.
    #[arg(long, conflicts_with = "clear_shared")]
    read_shared: bool,
    /// Remove every slot from the shared store and exit.
    #[arg(long)]
    clear_shared: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if cli.telegram_on {
        cfg.telegram.enabled = true;
    } else if cli.telegram_off {
        cfg.telegram.enabled = false;
    }

    let shared_store = open_store(&cfg.storage.shared_dir, "общее");
    if cli.read_shared {
        print_shared(SharedReader::new(shared_store));
        return;
    }
    let shared = SharedWriter::new(shared_store);
    if cli.clear_shared {
        if let Err(err) = shared.clear_all() {
            error!(error = %err, "не удалось очистить общее хранилище");
            std::process::exit(1);
        }
        info!("общее хранилище очищено");
        return;
    }

    let telegram_token = if cfg.telegram.enabled {
        match telegram::resolve_token(&cfg.telegram) {
            Ok(token) => Some(token),
            Err(err) => {
                error!(error = %err, "не удалось подготовить настройки Telegram");
                std::process::exit(1);
            }
        }
    } else {
        None
    };

    info!(listen = %cfg.listen, pip = cfg.pip.enabled, "запуск activityd");

    let app_store = open_store(&cfg.storage.app_dir, "приватное");
    let settings = Arc::new(SettingsManager::load(app_store.clone(), shared.clone()));
    let notifier = ThresholdNotifier::load(app_store.clone());
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };

    let telegram_bot = telegram_token.map(Bot::new);
    let mut sinks: Vec<Arc<dyn AlertSink>> = vec![Arc::new(LogSink)];
    if let Some(bot) = &telegram_bot {
        sinks.push(Arc::new(TelegramSink::new(bot.clone(), &cfg.telegram)));
    }

    // mount points are absolute, so the volume lookup needs an absolute path
    let storage_path = std::fs::canonicalize(app_store.root())
        .unwrap_or_else(|_| app_store.root().to_path_buf());
    let source = SystemCounters::new(storage_path);
    let monitor = Monitor::new(
        Box::new(source),
        settings,
        shared,
        notifier,
        sinks,
        metrics,
    )
    .await;
    if let Err(err) = monitor.start().await {
        error!(error = %err, "не удалось запустить мониторинг");
        std::process::exit(1);
    }

    let pip = if cfg.pip.enabled {
        match PipController::spawn(
            monitor.clone(),
            Arc::new(RasterRenderer::default()),
            cfg.pip.retained_frames,
        ) {
            Ok(pip) => Some(pip),
            Err(err) => {
                warn!(error = %err, "PiP недоступен");
                None
            }
        }
    } else {
        None
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let listen = cfg.listen.clone();
        let app = http::build_router(monitor.clone(), pip.clone());
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    let telegram_task = if let Some(bot) = telegram_bot {
        let telegram_cfg = cfg.telegram.clone();
        let monitor = monitor.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(async move {
            if let Err(err) = telegram::run_bot(bot, telegram_cfg, monitor, shutdown).await {
                error!(error = %err, "ошибка задачи Telegram");
            }
        }))
    } else {
        None
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    let _ = shutdown_tx.send(true);
    monitor.stop();
    if let Some(pip) = &pip {
        pip.stop();
    }

    if let Some(task) = telegram_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn open_store(dir: &std::path::Path, label: &str) -> KvStore {
    match KvStore::open(dir) {
        Ok(store) => store,
        Err(err) => {
            error!(error = %err, store = label, "не удалось открыть хранилище");
            std::process::exit(1);
        }
    }
}

fn print_shared(reader: SharedReader) {
    let now_ms = now_unix_ms();
    let report = serde_json::json!({
        "snapshot": reader.current_or_placeholder(now_ms),
        "display_selection": reader.display_selection(),
        "last_update_ms": reader.last_update_ms(),
        "data_age_secs": reader.data_age(now_ms).map(|age| age.as_secs()),
    });
    match serde_json::to_string_pretty(&report) {
        Ok(text) => println!("{text}"),
        Err(err) => {
            error!(error = %err, "не удалось сериализовать данные общего хранилища");
            std::process::exit(1);
        }
    }
}

use crate::alerts::{AlertAction, AlertError, AlertRequest, AlertSink, ThresholdConfig};
use crate::config::TelegramConfig;
use crate::format;
use crate::monitor::Monitor;
use crate::state::{MetricKind, Snapshot};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use teloxide::prelude::*;
use teloxide::types::{
    CallbackQuery, ChatId, InlineKeyboardButton, InlineKeyboardMarkup, Message, MessageId,
    ParseMode,
};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TelegramError {
    #[error("ошибка запроса Telegram: {0}")]
    Request(#[from] teloxide::RequestError),
    #[error("некорректные настройки Telegram: {0}")]
    Settings(String),
}

/// Delivers threshold alerts to every allowed chat with open/dismiss buttons.
pub struct TelegramSink {
    bot: Bot,
    chats: Vec<i64>,
}

impl TelegramSink {
    pub fn new(bot: Bot, cfg: &TelegramConfig) -> Self {
        Self {
            bot,
            chats: cfg.allowed_chat_ids.clone(),
        }
    }
}

impl AlertSink for TelegramSink {
    fn name(&self) -> &'static str {
        "telegram"
    }

    fn deliver(&self, request: &AlertRequest) -> Result<(), AlertError> {
        if self.chats.is_empty() {
            return Err(AlertError::Rejected("нет разрешённых чатов".to_string()));
        }
        let runtime = Handle::try_current().map_err(|_| AlertError::NoRuntime)?;

        let bot = self.bot.clone();
        let chats = self.chats.clone();
        let text = format_alert(request);
        let keyboard = alert_keyboard(&request.identifier);
        let identifier = request.identifier.clone();
        runtime.spawn(async move {
            for chat_id in chats {
                if let Err(err) = bot
                    .send_message(ChatId(chat_id), text.clone())
                    .parse_mode(ParseMode::Html)
                    .reply_markup(keyboard.clone())
                    .await
                {
                    warn!(chat_id, identifier = %identifier, error = %err, "не удалось отправить уведомление в Telegram");
                }
            }
        });
        Ok(())
    }
}

#[derive(Clone)]
struct TelegramRuntime {
    monitor: Arc<Monitor>,
    allowed_chats: HashSet<i64>,
    limiter: Arc<Mutex<RateLimiter>>,
    dashboard_messages: Arc<Mutex<HashMap<i64, i32>>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Start,
    Help,
    Status,
    Thresholds,
}

impl Action {
    fn from_command(text: &str) -> Option<Self> {
        let first = text.split_whitespace().next()?;
        let normalized = first.split('@').next()?.to_lowercase();
        match normalized.as_str() {
            "/start" => Some(Self::Start),
            "/help" => Some(Self::Help),
            "/status" => Some(Self::Status),
            "/thresholds" => Some(Self::Thresholds),
            _ => None,
        }
    }

    fn from_callback(data: &str) -> Option<Self> {
        match data {
            "refresh" | "status" => Some(Self::Status),
            "thresholds" => Some(Self::Thresholds),
            "help" => Some(Self::Help),
            _ => None,
        }
    }
}

struct RenderedView {
    text: String,
    keyboard: InlineKeyboardMarkup,
}

pub async fn run_bot(
    bot: Bot,
    cfg: TelegramConfig,
    monitor: Arc<Monitor>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), TelegramError> {
    let runtime = TelegramRuntime {
        monitor,
        allowed_chats: cfg.allowed_chat_ids.iter().copied().collect(),
        limiter: Arc::new(Mutex::new(RateLimiter::new(cfg.rate_limit_per_minute))),
        dashboard_messages: Arc::new(Mutex::new(HashMap::new())),
    };

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(handle_message))
        .branch(Update::filter_callback_query().endpoint(handle_callback));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![runtime])
        .build();

    let mut dispatch_handle = tokio::spawn(async move {
        dispatcher.dispatch().await;
    });

    tokio::select! {
        _ = shutdown.changed() => {
            dispatch_handle.abort();
            let _ = (&mut dispatch_handle).await;
            info!("остановка Telegram-бота");
            Ok(())
        }
        result = &mut dispatch_handle => {
            match result {
                Ok(()) => Ok(()),
                Err(join_err) if join_err.is_cancelled() => Ok(()),
                Err(join_err) => {
                    warn!(error = %join_err, "задача Telegram завершилась с ошибкой");
                    Ok(())
                }
            }
        }
    }
}

async fn handle_message(bot: Bot, msg: Message, runtime: TelegramRuntime) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    if !should_handle_message(msg.chat.is_private(), chat_id, &runtime.allowed_chats) {
        return Ok(());
    }

    if !consume_rate_limit(&runtime, chat_id).await {
        bot.send_message(msg.chat.id, "Слишком много запросов. Попробуйте чуть позже.")
            .await?;
        return Ok(());
    }

    let action = msg
        .text()
        .and_then(Action::from_command)
        .unwrap_or(Action::Start);

    let response = render_action(action, &runtime).await;
    upsert_dashboard_message(&bot, msg.chat.id, &runtime, response).await?;
    Ok(())
}

async fn handle_callback(
    bot: Bot,
    q: CallbackQuery,
    runtime: TelegramRuntime,
) -> ResponseResult<()> {
    let Some(data) = q.data.as_deref() else {
        return Ok(());
    };
    let Some(message) = q.message.as_ref() else {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    };

    let chat_id = message.chat.id.0;
    if !should_handle_message(message.chat.is_private(), chat_id, &runtime.allowed_chats) {
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    }

    if !consume_rate_limit(&runtime, chat_id).await {
        bot.answer_callback_query(q.id)
            .text("Слишком много запросов. Попробуйте позже.")
            .await?;
        return Ok(());
    }

    if let Some((action, identifier)) = AlertAction::parse_callback(data) {
        info!(action = %action, identifier, chat_id, "ответ на уведомление");
        match action {
            AlertAction::Open => {
                let response = render_action(Action::Status, &runtime).await;
                upsert_dashboard_message(&bot, message.chat.id, &runtime, response).await?;
            }
            AlertAction::Dismiss => {
                if let Err(err) = bot.delete_message(message.chat.id, message.id).await {
                    warn!(chat_id, error = %err, "не удалось удалить уведомление");
                }
            }
        }
        bot.answer_callback_query(q.id).await?;
        return Ok(());
    }

    {
        let mut map = runtime.dashboard_messages.lock().await;
        map.insert(chat_id, message.id.0);
    }

    if let Some(action) = Action::from_callback(data) {
        let response = render_action(action, &runtime).await;
        upsert_dashboard_message(&bot, message.chat.id, &runtime, response).await?;
    }

    bot.answer_callback_query(q.id).await?;
    Ok(())
}

async fn render_action(action: Action, runtime: &TelegramRuntime) -> RenderedView {
    let text = match action {
        Action::Start => {
            "<b>activityd</b> запущен. Нажмите кнопку ниже для сводки.".to_string()
        }
        Action::Help => help_text(),
        Action::Status => {
            let snapshot = runtime.monitor.current_snapshot().await;
            let started_at = runtime.monitor.started_at_unix().await;
            format_status(&snapshot, started_at, runtime.monitor.is_running())
        }
        Action::Thresholds => format_thresholds(&runtime.monitor.thresholds().await),
    };
    RenderedView {
        text,
        keyboard: main_menu(),
    }
}

fn main_menu() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("Обновить", "refresh"),
            InlineKeyboardButton::callback("Пороги", "thresholds"),
        ],
        vec![InlineKeyboardButton::callback("Помощь", "help")],
    ])
}

fn alert_keyboard(identifier: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Открыть", AlertAction::Open.callback_data(identifier)),
        InlineKeyboardButton::callback("Скрыть", AlertAction::Dismiss.callback_data(identifier)),
    ]])
}

fn help_text() -> String {
    [
        "<b>Команды</b>",
        "• /status - текущие показатели",
        "• /thresholds - пороги уведомлений",
        "• /help - эта справка",
    ]
    .join("\n")
}

async fn consume_rate_limit(runtime: &TelegramRuntime, chat_id: i64) -> bool {
    let now = now_unix();
    let mut limiter = runtime.limiter.lock().await;
    limiter.allow(chat_id, now)
}

async fn upsert_dashboard_message(
    bot: &Bot,
    chat_id: ChatId,
    runtime: &TelegramRuntime,
    view: RenderedView,
) -> ResponseResult<()> {
    let existing = {
        let map = runtime.dashboard_messages.lock().await;
        map.get(&chat_id.0).copied()
    };

    if let Some(msg_id) = existing {
        let result = bot
            .edit_message_text(chat_id, MessageId(msg_id), view.text.clone())
            .parse_mode(ParseMode::Html)
            .reply_markup(view.keyboard.clone())
            .await;
        if result.is_ok() {
            return Ok(());
        }
    }

    let sent = bot
        .send_message(chat_id, view.text)
        .parse_mode(ParseMode::Html)
        .reply_markup(view.keyboard)
        .await?;

    let mut map = runtime.dashboard_messages.lock().await;
    map.insert(chat_id.0, sent.id.0);
    Ok(())
}

pub fn should_handle_message(is_private: bool, chat_id: i64, allowed: &HashSet<i64>) -> bool {
    is_private && allowed.contains(&chat_id)
}

/// Picks the bot token: the environment variable wins over the config literal.
pub fn resolve_token(cfg: &TelegramConfig) -> Result<String, TelegramError> {
    if cfg.allowed_chat_ids.is_empty() {
        return Err(TelegramError::Settings(
            "telegram.allowed_chat_ids пуст: укажите хотя бы один chat id в config".to_string(),
        ));
    }

    let env_token = std::env::var(&cfg.bot_token_env)
        .ok()
        .filter(|v| !v.trim().is_empty());
    let cfg_token = cfg
        .bot_token
        .as_ref()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    env_token.or(cfg_token).ok_or_else(|| {
        TelegramError::Settings(format!(
            "не найден токен Telegram: задайте '{}' в окружении или telegram.bot_token в config",
            cfg.bot_token_env
        ))
    })
}

#[derive(Debug)]
struct RateLimiter {
    limit_per_minute: u32,
    timestamps_by_chat: HashMap<i64, VecDeque<i64>>,
}

impl RateLimiter {
    fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute,
            timestamps_by_chat: HashMap::new(),
        }
    }

    fn allow(&mut self, chat_id: i64, now_unix: i64) -> bool {
        let queue = self.timestamps_by_chat.entry(chat_id).or_default();
        while let Some(ts) = queue.front().copied() {
            if now_unix - ts >= 60 {
                queue.pop_front();
            } else {
                break;
            }
        }

        if queue.len() >= self.limit_per_minute as usize {
            return false;
        }

        queue.push_back(now_unix);
        true
    }
}

fn format_alert(request: &AlertRequest) -> String {
    format!("⚠️ <b>{}</b>\n{}", request.title, request.body)
}

fn format_status(snapshot: &Snapshot, started_at: i64, running: bool) -> String {
    let now = now_unix();
    let line = |kind: MetricKind| {
        format!(
            "{}: <b>{}</b>",
            kind.display_name(),
            format::metric_value(kind, kind.value(snapshot))
        )
    };
    let sampling = if running { "идёт" } else { "остановлен" };

    [
        "<b>Сводка</b>".to_string(),
        line(MetricKind::CpuTotal),
        format!(
            "RAM: <b>{}</b> ({} / {})",
            format::percent(snapshot.memory.usage_percentage()),
            format::bytes_compact(snapshot.memory.used),
            format::bytes_compact(snapshot.memory.total)
        ),
        format!(
            "Хранилище: <b>{}</b> ({} свободно)",
            format::percent(snapshot.storage.usage_percentage()),
            format::bytes_compact(snapshot.storage.free)
        ),
        line(MetricKind::NetworkDownload),
        line(MetricKind::NetworkUpload),
        line(MetricKind::DiskRead),
        line(MetricKind::DiskWrite),
        line(MetricKind::BatteryLevel),
        String::new(),
        format!("Сбор данных: {sampling}"),
        format!(
            "Последнее обновление: {}",
            format::format_unix_ms(snapshot.captured_at_ms)
        ),
        format!("Аптайм: {}", format::human_uptime(started_at, now)),
    ]
    .join("\n")
}

fn format_thresholds(config: &ThresholdConfig) -> String {
    let line = |name: &str, limit: f64, enabled: bool| {
        let mark = if enabled { "вкл" } else { "выкл" };
        format!("{name}: <b>{}</b> ({mark})", format::percent(limit))
    };
    [
        "<b>Пороги уведомлений</b>".to_string(),
        line("CPU", config.cpu.limit_percent, config.cpu.enabled),
        line("RAM", config.memory.limit_percent, config.memory.enabled),
        line(
            "Хранилище",
            config.storage.limit_percent,
            config.storage.enabled,
        ),
        format!("Пауза между уведомлениями: {} сек", config.cooldown_secs),
    ]
    .join("\n")
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

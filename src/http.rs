use crate::alerts::{AlertError, ThresholdConfig};
use crate::monitor::Monitor;
use crate::pip::PipController;
use crate::settings::{Settings, SettingsError};
use crate::state::MetricKind;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tracing::warn;

#[derive(Clone)]
pub struct HttpAppState {
    pub monitor: Arc<Monitor>,
    pub pip: Option<Arc<PipController>>,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    metric: MetricKind,
    values: Vec<f64>,
}

#[derive(Debug, Serialize)]
struct RunningResponse {
    running: bool,
}

pub fn build_router(monitor: Arc<Monitor>, pip: Option<Arc<PipController>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics_handler))
        .route("/api/snapshot", get(snapshot_handler))
        .route("/api/history/clear", post(clear_history))
        .route("/api/history/:metric", get(history_handler))
        .route("/api/monitoring/start", post(start_monitoring))
        .route("/api/monitoring/stop", post(stop_monitoring))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/thresholds", get(get_thresholds).put(put_thresholds))
        .route("/api/pip/start", post(start_pip))
        .route("/api/pip/stop", post(stop_pip))
        .route("/api/pip/frame", get(pip_frame))
        .with_state(HttpAppState { monitor, pip })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn metrics_handler(State(state): State<HttpAppState>) -> Response {
    let metrics = state.monitor.metrics();
    metrics.inc_scrape_count();
    match metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("ошибка кодирования метрик: {err}"),
        )
            .into_response(),
    }
}

async fn snapshot_handler(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(state.monitor.current_snapshot().await)
}

async fn history_handler(
    State(state): State<HttpAppState>,
    Path(metric): Path<String>,
) -> Response {
    match metric.parse::<MetricKind>() {
        Ok(metric) => Json(HistoryResponse {
            metric,
            values: state.monitor.history(metric).await,
        })
        .into_response(),
        Err(err) => (StatusCode::BAD_REQUEST, err.to_string()).into_response(),
    }
}

async fn clear_history(State(state): State<HttpAppState>) -> StatusCode {
    state.monitor.clear_history().await;
    StatusCode::NO_CONTENT
}

async fn start_monitoring(State(state): State<HttpAppState>) -> Response {
    match state.monitor.start().await {
        Ok(()) => Json(RunningResponse { running: true }).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn stop_monitoring(State(state): State<HttpAppState>) -> impl IntoResponse {
    state.monitor.stop();
    Json(RunningResponse { running: false })
}

async fn get_settings(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(state.monitor.settings().get().await)
}

async fn put_settings(
    State(state): State<HttpAppState>,
    Json(next): Json<Settings>,
) -> Response {
    match state.monitor.update_settings(move |s| *s = next).await {
        Ok(saved) => Json(saved).into_response(),
        Err(SettingsError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Err(err) => {
            warn!(error = %err, "не удалось сохранить настройки");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

async fn get_thresholds(State(state): State<HttpAppState>) -> impl IntoResponse {
    Json(state.monitor.thresholds().await)
}

async fn put_thresholds(
    State(state): State<HttpAppState>,
    Json(config): Json<ThresholdConfig>,
) -> Response {
    match state.monitor.update_thresholds(config).await {
        Ok(saved) => Json(saved).into_response(),
        Err(AlertError::Validation(msg)) => (StatusCode::BAD_REQUEST, msg).into_response(),
        Err(err) => {
            warn!(error = %err, "не удалось сохранить пороги уведомлений");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

fn pip_disabled() -> Response {
    (StatusCode::NOT_FOUND, "PiP отключён").into_response()
}

async fn start_pip(State(state): State<HttpAppState>) -> Response {
    let Some(pip) = state.pip else {
        return pip_disabled();
    };
    match pip.set_playing(true) {
        Ok(()) => Json(RunningResponse { running: true }).into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response(),
    }
}

async fn stop_pip(State(state): State<HttpAppState>) -> Response {
    let Some(pip) = state.pip else {
        return pip_disabled();
    };
    pip.stop();
    Json(RunningResponse { running: false }).into_response()
}

async fn pip_frame(State(state): State<HttpAppState>) -> Response {
    let Some(pip) = state.pip else {
        return pip_disabled();
    };
    match pip.latest_png() {
        Ok(Some(png)) => {
            let mut response = Response::new(Body::from(png));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static("image/png"));
            response
        }
        Ok(None) => (StatusCode::NOT_FOUND, "кадров ещё нет").into_response(),
        Err(err) => {
            warn!(error = %err, "не удалось закодировать кадр PiP");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::tests::fixture;
    use crate::pip::render::RasterRenderer;
    use axum::body::to_bytes;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn send(app: Router, method: &str, uri: &str, body: Option<String>) -> (StatusCode, String) {
        let mut builder = Request::builder().method(method).uri(uri);
        if body.is_some() {
            builder = builder.header(CONTENT_TYPE, "application/json");
        }
        let request = builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    #[tokio::test]
    async fn healthz_returns_ok() {
        let fx = fixture(10.0).await;
        let (status, body) = send(build_router(fx.monitor.clone(), None), "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn metrics_reflect_the_last_collect() {
        let fx = fixture(25.0).await;
        fx.monitor.collect_once().await;
        let (status, body) = send(build_router(fx.monitor.clone(), None), "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("activityd_uptime_seconds"));
        assert!(body.contains("activityd_metric_value{metric=\"cpu_total\"} 25"));
        assert!(body.contains("activityd_scrape_count_total 1"));
    }

    #[tokio::test]
    async fn snapshot_and_history_are_json() {
        let fx = fixture(25.0).await;
        fx.monitor.collect_once().await;
        let app = build_router(fx.monitor.clone(), None);

        let (status, body) = send(app.clone(), "GET", "/api/snapshot", None).await;
        assert_eq!(status, StatusCode::OK);
        let snapshot: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(snapshot["cpu"]["user"], 25.0);

        let (status, body) = send(app.clone(), "GET", "/api/history/cpu_total", None).await;
        assert_eq!(status, StatusCode::OK);
        let history: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(history["metric"], "CPU Total");
        assert_eq!(history["values"], serde_json::json!([25.0]));

        let (status, _) = send(app.clone(), "GET", "/api/history/gpu_load", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(app, "POST", "/api/history/clear", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(fx.monitor.history(MetricKind::CpuTotal).await.is_empty());
    }

    #[tokio::test]
    async fn monitoring_can_be_started_and_stopped() {
        let fx = fixture(10.0).await;
        let app = build_router(fx.monitor.clone(), None);

        let (status, body) = send(app.clone(), "POST", "/api/monitoring/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("true"));
        assert!(fx.monitor.is_running());

        let (status, _) = send(app, "POST", "/api/monitoring/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!fx.monitor.is_running());
    }

    #[tokio::test]
    async fn settings_updates_are_validated() {
        let fx = fixture(10.0).await;
        let app = build_router(fx.monitor.clone(), None);

        let mut settings = Settings::default();
        settings.refresh_interval_secs = 0;
        let (status, _) = send(
            app.clone(),
            "PUT",
            "/api/settings",
            Some(serde_json::to_string(&settings).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        settings.refresh_interval_secs = 5;
        settings.pip_metric = MetricKind::MemoryTotal;
        let (status, _) = send(
            app.clone(),
            "PUT",
            "/api/settings",
            Some(serde_json::to_string(&settings).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(app, "GET", "/api/settings", None).await;
        let saved: Settings = serde_json::from_str(&body).unwrap();
        assert_eq!(saved, settings);
    }

    #[tokio::test]
    async fn lowering_max_points_caps_served_history() {
        let fx = fixture(10.0).await;
        for _ in 0..6 {
            fx.monitor.collect_once().await;
        }
        let app = build_router(fx.monitor.clone(), None);

        let mut settings = Settings::default();
        settings.max_data_points = 2;
        let (status, _) = send(
            app.clone(),
            "PUT",
            "/api/settings",
            Some(serde_json::to_string(&settings).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(app, "GET", "/api/history/cpu_total", None).await;
        let history: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(history["values"], serde_json::json!([10.0, 10.0]));
    }

    #[tokio::test]
    async fn thresholds_round_trip_through_the_api() {
        let fx = fixture(10.0).await;
        let app = build_router(fx.monitor.clone(), None);

        let mut config = ThresholdConfig::default();
        config.storage.limit_percent = 150.0;
        let (status, _) = send(
            app.clone(),
            "PUT",
            "/api/thresholds",
            Some(serde_json::to_string(&config).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        config.storage.limit_percent = 70.0;
        config.cooldown_secs = 30;
        let (status, _) = send(
            app.clone(),
            "PUT",
            "/api/thresholds",
            Some(serde_json::to_string(&config).unwrap()),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fx.monitor.thresholds().await, config);
    }

    #[tokio::test]
    async fn pip_routes_need_a_controller_and_a_frame() {
        let fx = fixture(10.0).await;
        let (status, _) = send(build_router(fx.monitor.clone(), None), "GET", "/api/pip/frame", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let pip = PipController::spawn(fx.monitor.clone(), Arc::new(RasterRenderer::default()), 2)
            .unwrap();
        let app = build_router(fx.monitor.clone(), Some(pip.clone()));
        let (status, _) = send(app.clone(), "GET", "/api/pip/frame", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(app.clone(), "POST", "/api/pip/start", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!pip.is_playback_paused());
        let (status, _) = send(app, "POST", "/api/pip/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(pip.is_playback_paused());
    }
}

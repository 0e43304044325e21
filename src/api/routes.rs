//! API route definitions.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, routing::post, Json, Router};
use serde_json::{json, Value};
use tracing::{error, info};

use super::state::AppState;
use crate::air::Reading;
use crate::network::NetworkSignals;
use crate::scheduler::TaskError;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/network", get(network).post(report_network))
        .route("/snapshot", get(snapshot))
        .route("/readings", post(add_reading))
        .route("/refresh", post(refresh))
        .route("/location", get(location))
}

/// Handler failure rendered as `{ "error": ... }`.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: format!("{e:#}"),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(e: TaskError) -> Self {
        let status = match e {
            TaskError::Discarded | TaskError::Aborted => StatusCode::SERVICE_UNAVAILABLE,
            TaskError::Failed(_) | TaskError::Panicked(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        error!(status = %self.status, error = %self.message, "request failed");
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

fn meta() -> Value {
    json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": meta()
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    let tier = state.dashboard.monitor().tier();
    Json(json!({
        "data": {
            "scheduler": state.dashboard.scheduler().status(),
            "max_concurrent": state.dashboard.scheduler().max_concurrent(),
            "tier": tier,
            "polling": {
                "running": state.polling.is_running(),
                "interval_ms": state.polling.interval().as_millis() as u64
            }
        },
        "meta": meta()
    }))
}

async fn network(State(state): State<AppState>) -> Json<Value> {
    let monitor = state.dashboard.monitor();
    let tier = monitor.tier();
    Json(json!({
        "data": {
            "tier": tier,
            "signals": monitor.signals(),
            "strategy": tier.loading_strategy(),
            "polling_interval_ms": tier.polling_interval().as_millis() as u64
        },
        "meta": meta()
    }))
}

/// Signals pushed by a front end that can observe the client's connection.
async fn report_network(
    State(state): State<AppState>,
    Json(signals): Json<NetworkSignals>,
) -> Json<Value> {
    let changed = state.dashboard.monitor().update(signals);
    Json(json!({
        "data": {
            "tier": state.dashboard.monitor().tier(),
            "changed": changed.is_some()
        },
        "meta": meta()
    }))
}

async fn snapshot(State(state): State<AppState>) -> ApiResult {
    match state.dashboard.snapshot()? {
        Some(snap) => {
            let category = snap.category().label();
            Ok(Json(json!({
                "data": snap,
                "meta": { "category": category, "timestamp": chrono::Utc::now().to_rfc3339() }
            })))
        }
        None => Ok(Json(json!({ "data": null, "meta": { "message": "no readings yet" } }))),
    }
}

async fn add_reading(
    State(state): State<AppState>,
    Json(reading): Json<Reading>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let snap = state.dashboard.ingest(reading)?;
    info!(aqi = snap.current_aqi, "reading accepted");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "data": snap, "meta": meta() })),
    ))
}

async fn refresh(State(state): State<AppState>) -> ApiResult {
    match state.dashboard.refresh().await? {
        Some(view) => Ok(Json(json!({ "data": view, "meta": meta() }))),
        None => Ok(Json(json!({ "data": null, "meta": { "message": "no readings yet" } }))),
    }
}

async fn location(State(state): State<AppState>) -> Json<Value> {
    let current = state.location.current();
    let name = current.as_ref().map(|l| l.display_name());
    Json(json!({
        "data": current,
        "meta": { "enabled": state.location.is_enabled(), "display_name": name }
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use tower::ServiceExt; // for `oneshot`

    use crate::api::{router, state::AppState};
    use crate::dashboard::Dashboard;
    use crate::location::{LocationTracker, ReverseGeocoder, UnsupportedProvider};
    use crate::network::NetworkQualityMonitor;
    use crate::polling::PollingController;
    use crate::scheduler::{IdleMode, SchedulerConfig, TaskScheduler};
    use crate::storage::{MemoryStore, SnapshotStore};

    struct Nowhere;

    #[async_trait]
    impl ReverseGeocoder for Nowhere {
        async fn name_for(&self, _latitude: f64, _longitude: f64) -> anyhow::Result<String> {
            Ok("Nowhere".to_string())
        }
    }

    fn app_state() -> AppState {
        let store: Arc<dyn SnapshotStore> = Arc::new(MemoryStore::new());
        let scheduler = TaskScheduler::new(SchedulerConfig {
            idle: IdleMode::Immediate,
            ..SchedulerConfig::default()
        });
        let monitor = Arc::new(NetworkQualityMonitor::default());
        let dashboard =
            Arc::new(Dashboard::new(Arc::clone(&store), scheduler.clone(), monitor).without_latency());
        let polling = Arc::new(PollingController::new(scheduler.clone(), Duration::from_secs(15)));
        let location = Arc::new(LocationTracker::new(
            Arc::new(UnsupportedProvider),
            Arc::new(Nowhere),
            store,
            scheduler,
            0.1,
        ));
        AppState {
            dashboard,
            polling,
            location,
        }
    }

    async fn call(
        state: AppState,
        method: Method,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 100_000)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    const READING: &str = r#"{
        "aqi": 72, "temperature": 19.5, "humidity": 48.0, "windSpeed": 11.0,
        "windDirection": "E", "visibility": 9.0,
        "pollutants": {"pm25": 14.0, "pm10": 28.0, "o3": 55.0, "no2": 18.0, "so2": 4.0, "co": 0.5}
    }"#;

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, json) = call(app_state(), Method::GET, "/api/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["status"], "ok");
        assert!(json["meta"]["version"].is_string());
    }

    #[tokio::test]
    async fn test_status_reports_scheduler_and_tier() {
        let (status, json) = call(app_state(), Method::GET, "/api/v1/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["scheduler"]["pending"], 0);
        assert_eq!(json["data"]["tier"], "high");
        assert_eq!(json["data"]["polling"]["running"], false);
        assert_eq!(json["data"]["polling"]["interval_ms"], 15_000);
    }

    #[tokio::test]
    async fn test_reported_signals_change_tier() {
        let state = app_state();
        let (status, json) = call(
            state.clone(),
            Method::POST,
            "/api/v1/network",
            Some(r#"{"online": true, "effective_type": "3g"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["tier"], "low");
        assert_eq!(json["data"]["changed"], true);

        let (_, json) = call(state, Method::GET, "/api/v1/network", None).await;
        assert_eq!(json["data"]["tier"], "low");
        assert_eq!(json["data"]["strategy"]["load_stations"], false);
        assert_eq!(json["data"]["polling_interval_ms"], 60_000);
    }

    #[tokio::test]
    async fn test_snapshot_empty_then_ingested() {
        let state = app_state();
        let (_, json) = call(state.clone(), Method::GET, "/api/v1/snapshot", None).await;
        assert!(json["data"].is_null());

        let (status, json) =
            call(state.clone(), Method::POST, "/api/v1/readings", Some(READING)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(json["data"]["currentAQI"], 72);

        let (_, json) = call(state, Method::GET, "/api/v1/snapshot", None).await;
        assert_eq!(json["data"]["currentAQI"], 72);
        assert_eq!(json["meta"]["category"], "Moderate");
    }

    #[tokio::test]
    async fn test_refresh_returns_view() {
        let state = app_state();
        let (_, json) = call(state.clone(), Method::POST, "/api/v1/refresh", None).await;
        assert!(json["data"].is_null());

        call(state.clone(), Method::POST, "/api/v1/readings", Some(READING)).await;
        let (status, json) = call(state, Method::POST, "/api/v1/refresh", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["category"], "moderate");
        assert_eq!(json["data"]["recommendations"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_reading_is_rejected() {
        let (status, _) = call(
            app_state(),
            Method::POST,
            "/api/v1/readings",
            Some(r#"{"aqi": "high"}"#),
        )
        .await;
        assert!(status.is_client_error());
    }

    #[tokio::test]
    async fn test_location_without_provider() {
        let (status, json) = call(app_state(), Method::GET, "/api/v1/location", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["data"].is_null());
        assert_eq!(json["meta"]["enabled"], false);
    }

    #[tokio::test]
    async fn test_cross_origin_requests_allowed() {
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/v1/health")
            .header("origin", "http://dashboard.local")
            .body(Body::empty())
            .unwrap();
        let response = router(app_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["access-control-allow-origin"], "*");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let (status, _) = call(app_state(), Method::GET, "/api/v2/nothing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

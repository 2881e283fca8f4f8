//! HTTP status and control API for the calibration engine.
//!
//! Exposes calibration progress, the latest result, the polled event log and
//! on-demand quality scans over the attached store. Calibrations run on the
//! orchestrator's background thread; handlers never block the runtime.

use std::sync::{Arc, Mutex};

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use trialscope_core::{
    CalibrationOrchestrator, CancellationToken, EngineError, Progress, QualityController, Store,
    TimedEvent,
};

const DEFAULT_QUALITY_MINUTES: u64 = 60;
const MAX_QUALITY_MINUTES: u64 = 7 * 24 * 60;

/// Everything the handlers share.
pub struct ServerState {
    orchestrator: CalibrationOrchestrator,
    quality: QualityController,
    store: Arc<dyn Store>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl ServerState {
    /// The quality controller reports into the orchestrator's event log so
    /// `/events` carries both.
    pub fn new(orchestrator: CalibrationOrchestrator, store: Arc<dyn Store>) -> Self {
        let quality = QualityController::new(
            trialscope_core::AnomalyDetector::from_settings(orchestrator.settings()),
            orchestrator.events().clone(),
        );
        Self {
            orchestrator,
            quality,
            store,
            cancel: Mutex::new(None),
        }
    }
}

type Shared = State<Arc<ServerState>>;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    calibration_running: bool,
    system_score: f64,
}

#[derive(Serialize)]
struct StatusResponse {
    running: bool,
    progress: Progress,
}

#[derive(Serialize)]
struct MessageResponse {
    success: bool,
    message: String,
}

impl MessageResponse {
    fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }

    fn error(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: false,
            message: message.into(),
        })
    }
}

#[derive(Serialize)]
struct EventsResponse {
    events: Vec<TimedEvent>,
    total: usize,
}

#[derive(Deserialize)]
struct QualityParams {
    minutes: Option<u64>,
}

async fn handle_index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "trialscope server",
        "version": trialscope_core::VERSION,
        "endpoints": {
            "/": "This API index",
            "/health": "Server liveness and host resource score",
            "/calibration/status": "Calibration state and progress",
            "/calibration/standard": {
                "method": "POST",
                "description": "Start a standard calibration (409 while one is running)",
            },
            "/calibration/cancel": {
                "method": "POST",
                "description": "Cancel the calibration started through this server",
            },
            "/calibration/result": "Most recent calibration result",
            "/events": "Drain queued engine events",
            "/quality": {
                "method": "GET",
                "description": "Quality scan over recent trials",
                "params": {
                    "minutes": format!("Window length (1-{MAX_QUALITY_MINUTES}, default: {DEFAULT_QUALITY_MINUTES})"),
                }
            },
        },
    }))
}

async fn handle_health(State(state): Shared) -> Json<HealthResponse> {
    let system_score = tokio::task::spawn_blocking(|| {
        trialscope_core::telemetry::collect_system_snapshot().resource_score()
    })
    .await
    .unwrap_or(0.0);
    Json(HealthResponse {
        status: "ok",
        version: trialscope_core::VERSION,
        calibration_running: state.orchestrator.is_running(),
        system_score,
    })
}

async fn handle_calibration_status(State(state): Shared) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.orchestrator.is_running(),
        progress: state.orchestrator.progress(),
    })
}

async fn handle_start_standard(State(state): Shared) -> (StatusCode, Json<MessageResponse>) {
    match state.orchestrator.spawn_standard() {
        Ok(handle) => {
            *state.cancel.lock().unwrap_or_else(|e| e.into_inner()) =
                Some(handle.cancellation_token());
            info!("standard calibration started via HTTP");
            // The result is published through `last_result` and the event log.
            drop(handle);
            (
                StatusCode::ACCEPTED,
                MessageResponse::ok("standard calibration started"),
            )
        }
        Err(EngineError::ConcurrentCalibration) => (
            StatusCode::CONFLICT,
            MessageResponse::error(EngineError::ConcurrentCalibration.to_string()),
        ),
        Err(e) => {
            warn!("failed to start calibration: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                MessageResponse::error(e.to_string()),
            )
        }
    }
}

async fn handle_cancel(State(state): Shared) -> (StatusCode, Json<MessageResponse>) {
    let token = state.cancel.lock().unwrap_or_else(|e| e.into_inner()).take();
    match token {
        Some(token) if state.orchestrator.is_running() => {
            token.cancel();
            (StatusCode::OK, MessageResponse::ok("cancellation requested"))
        }
        _ => (
            StatusCode::NOT_FOUND,
            MessageResponse::error("no calibration to cancel"),
        ),
    }
}

async fn handle_calibration_result(
    State(state): Shared,
) -> Result<Json<trialscope_core::Report>, (StatusCode, Json<MessageResponse>)> {
    state.orchestrator.last_result().map(Json).ok_or((
        StatusCode::NOT_FOUND,
        MessageResponse::error("no calibration has completed yet"),
    ))
}

async fn handle_events(State(state): Shared) -> Json<EventsResponse> {
    let events = state.orchestrator.events().drain();
    let total = events.len();
    Json(EventsResponse { events, total })
}

async fn handle_quality(
    State(state): Shared,
    Query(params): Query<QualityParams>,
) -> Result<Json<trialscope_core::QualityReport>, (StatusCode, Json<MessageResponse>)> {
    let minutes = params
        .minutes
        .unwrap_or(DEFAULT_QUALITY_MINUTES)
        .clamp(1, MAX_QUALITY_MINUTES);
    let task = tokio::task::spawn_blocking(move || {
        state
            .quality
            .assess_recent(state.store.as_ref(), trialscope_core::now_ms(), minutes * 60_000)
    });
    match task.await {
        Ok(Ok(report)) => Ok(Json(report)),
        Ok(Err(e)) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            MessageResponse::error(e.to_string()),
        )),
        Err(e) => Err((
            StatusCode::INTERNAL_SERVER_ERROR,
            MessageResponse::error(format!("quality scan aborted: {e}")),
        )),
    }
}

/// Build the axum router.
pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/", get(handle_index))
        .route("/health", get(handle_health))
        .route("/calibration/status", get(handle_calibration_status))
        .route("/calibration/standard", post(handle_start_standard))
        .route("/calibration/cancel", post(handle_cancel))
        .route("/calibration/result", get(handle_calibration_result))
        .route("/events", get(handle_events))
        .route("/quality", get(handle_quality))
        .with_state(Arc::new(state))
}

/// Run the HTTP server until the process is stopped.
pub async fn run_server(state: ServerState, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(state);
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {addr}");
    axum::serve(listener, app).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use trialscope_core::{
        EngineConfig, ExtendedOptions, MemoryStore, SeededSource, TrialGenerator,
    };

    fn state() -> Arc<ServerState> {
        let mut config = EngineConfig::default();
        config.calibration.trials_per_interval = 10;
        config.calibration.sample_interval_ms = 20;
        config.calibration.extended_duration_ms = 60_000;
        let orchestrator =
            CalibrationOrchestrator::new(config.validate().unwrap(), Arc::new(SeededSource::new(1)));

        let store = Arc::new(MemoryStore::new());
        let mut generator = TrialGenerator::new(Arc::new(SeededSource::new(2)), 200, "srv");
        store.extend(generator.generate(300).unwrap().trials).unwrap();
        Arc::new(ServerState::new(orchestrator, store))
    }

    #[tokio::test]
    async fn test_start_conflicts_while_running() {
        let state = state();
        let running = state
            .orchestrator
            .spawn_extended(ExtendedOptions::from_settings(state.orchestrator.settings()))
            .unwrap();

        let (status, Json(body)) = handle_start_standard(State(state.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(!body.success);

        let Json(status) = handle_calibration_status(State(state.clone())).await;
        assert!(status.running);

        running.cancel();
        running.join().unwrap();
        assert!(handle_calibration_result(State(state)).await.is_ok());
    }

    #[tokio::test]
    async fn test_quality_window_and_events() {
        let state = state();
        assert!(handle_calibration_result(State(state.clone())).await.is_err());

        let report = handle_quality(State(state.clone()), Query(QualityParams { minutes: Some(5) }))
            .await
            .map(|Json(r)| r)
            .unwrap_or_else(|_| panic!("quality scan failed"));
        assert_eq!(report.trial_count, 300);

        let Json(events) = handle_events(State(state.clone())).await;
        assert!(events.total >= 1);
        let Json(events) = handle_events(State(state)).await;
        assert_eq!(events.total, 0);
    }

    #[tokio::test]
    async fn test_cancel_without_run_is_not_found() {
        let (status, _) = handle_cancel(State(state())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

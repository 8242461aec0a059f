//! Read-only HTTP query surface for dashboards. Every handler answers from the
//! engine's in-memory snapshot.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::engine::Engine;
use crate::error::WindowError;
use crate::reading::Reading;
use crate::stats::StatsSummary;
use crate::status::EngineStatus;
use crate::window::TimeWindow;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub default_window: TimeWindow,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, default_window: TimeWindow) -> Self {
        Self {
            engine,
            default_window,
        }
    }

    fn window(&self, q: &WindowQuery) -> Result<TimeWindow, ApiError> {
        match q.window.as_deref() {
            None | Some("") => Ok(self.default_window.clone()),
            Some(id) => id.parse().map_err(ApiError::BadWindow),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/windows", get(windows))
        .route("/readings", get(readings))
        .route("/stats", get(stats))
        .route("/status", get(status))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

#[derive(Debug, serde::Deserialize)]
struct WindowQuery {
    #[serde(default)]
    window: Option<String>,
}

#[derive(serde::Serialize)]
struct ReadingsOut {
    window: TimeWindow,
    readings: Vec<Reading>,
}

#[derive(serde::Serialize)]
struct StatsOut {
    window: TimeWindow,
    count: usize,
    stats: StatsSummary,
}

enum ApiError {
    BadWindow(WindowError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadWindow(e) => {
                tracing::debug!(target: "api", error = %e, "rejected window");
                let body = serde_json::json!({ "error": e.to_string() });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
        }
    }
}

async fn windows() -> Json<Vec<TimeWindow>> {
    Json(TimeWindow::presets())
}

async fn readings(
    State(state): State<AppState>,
    Query(q): Query<WindowQuery>,
) -> Result<Json<ReadingsOut>, ApiError> {
    let window = state.window(&q)?;
    let readings = state.engine.filtered_view(&window);
    Ok(Json(ReadingsOut { window, readings }))
}

async fn stats(
    State(state): State<AppState>,
    Query(q): Query<WindowQuery>,
) -> Result<Json<StatsOut>, ApiError> {
    let window = state.window(&q)?;
    let view = state.engine.filtered_view(&window);
    Ok(Json(StatsOut {
        window,
        count: view.len(),
        stats: Engine::stats(&view),
    }))
}

async fn status(State(state): State<AppState>) -> Json<EngineStatus> {
    Json(state.engine.status())
}

//! HTTP surface of one stage.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use super::error::ApiError;
use crate::entity::NotificationEvent;
use crate::stage::{ReactOutcome, RunRecord, Stage, StageStatus, Trigger};

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub stage: Arc<Stage>,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    stage: String,
    version: &'static str,
}

#[derive(Debug, Serialize)]
struct Reacted {
    status: &'static str,
}

/// `/health`, `/status`, `/run`, `/react` and `/sync-all`.
pub fn router(stage: Arc<Stage>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/run", post(run_handler))
        .route("/react", post(react_handler))
        .route("/sync-all", post(sync_all_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { stage })
}

async fn health_handler(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        stage: state.stage.name().to_string(),
        version: crate::VERSION,
    })
}

async fn status_handler(State(state): State<AppState>) -> Json<StageStatus> {
    Json(state.stage.status())
}

/// Manual run; waits for an in-flight run rather than dropping.
async fn run_handler(State(state): State<AppState>) -> Result<Json<RunRecord>, ApiError> {
    finished(state.stage.run(Trigger::Manual).await)
}

async fn sync_all_handler(State(state): State<AppState>) -> Result<Json<RunRecord>, ApiError> {
    finished(state.stage.run(Trigger::Reconcile).await)
}

/// Notification entry point; answers before the run completes.
async fn react_handler(
    State(state): State<AppState>,
    Json(event): Json<NotificationEvent>,
) -> Response {
    let (status, label) = match state.stage.react(event) {
        ReactOutcome::Ignored => (StatusCode::OK, "ignored"),
        ReactOutcome::Skipped => (StatusCode::OK, "skipped"),
        ReactOutcome::Accepted(_) => (StatusCode::ACCEPTED, "accepted"),
    };
    (status, Json(Reacted { status: label })).into_response()
}

fn finished(record: RunRecord) -> Result<Json<RunRecord>, ApiError> {
    match ApiError::from_record(&record) {
        Some(error) => Err(error),
        None => Ok(Json(record)),
    }
}

//! HTTP routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;

use rf_workflow::{DispatchResult, ValidationResult};

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/transcripts/:id/events", get(crate::ws::transcript_events))
        .route("/v1/transcripts/:id/process", post(process_transcript))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

#[derive(Debug, Deserialize)]
struct ProcessQuery {
    #[serde(default)]
    force: bool,
}

/// Drive validate → prepare → dispatch for one transcript.
async fn process_transcript(
    State(state): State<AppState>,
    Path(transcript_id): Path<String>,
    Query(query): Query<ProcessQuery>,
) -> impl IntoResponse {
    let Some(transcript) = state.stores.transcripts.get(&transcript_id) else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "detail": "transcript not found" })),
        );
    };

    let ok = match state.dispatcher.validate(&transcript).await {
        ValidationResult::Ok(ok) => ok,
        ValidationResult::Locked(detail) => {
            return (StatusCode::CONFLICT, Json(json!({ "detail": detail })));
        }
        ValidationResult::NotReady(detail) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "detail": detail })));
        }
        ValidationResult::AlreadyScheduled(detail) => {
            return (StatusCode::OK, Json(json!({ "status": "already_running", "detail": detail })));
        }
    };

    let config = match state.dispatcher.prepare(&ok).await {
        Ok(config) => config,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "detail": e.to_string() })),
            );
        }
    };

    match state.dispatcher.dispatch(&config, query.force).await {
        Ok(DispatchResult::Ok) => (StatusCode::OK, Json(json!({ "status": "ok" }))),
        Ok(DispatchResult::AlreadyRunning) => (
            StatusCode::OK,
            Json(json!({ "status": "already_running" })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": e.to_string() })),
        ),
    }
}

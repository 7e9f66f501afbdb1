//! REST API handlers for releases and history.
//!
//! `create_release` is the front door: it resolves the revision,
//! composes the environment's desired state, persists the release, and
//! hands it to the controller.

use std::time::{SystemTime, UNIX_EPOCH};

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::info;

use slipway_rollout::RolloutError;
use slipway_state::Release;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Releases ───────────────────────────────────────────────────

/// Request body to cut a release.
#[derive(serde::Deserialize)]
pub struct CreateReleaseRequest {
    pub revision: String,
    pub environment: String,
}

/// POST /api/v1/releases
pub async fn create_release(
    State(state): State<ApiState>,
    Json(req): Json<CreateReleaseRequest>,
) -> impl IntoResponse {
    let artifact = match state.resolver.resolve(&req.revision).await {
        Ok(artifact) => artifact,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::UNPROCESSABLE_ENTITY)
                .into_response();
        }
    };

    let target = match state.composer.compose(&artifact, &req.environment) {
        Ok(target) => target,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::UNPROCESSABLE_ENTITY)
                .into_response();
        }
    };

    let sequence = match state.store.next_release_sequence() {
        Ok(sequence) => sequence,
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };
    let release = Release {
        sequence,
        artifact,
        revision: req.revision.clone(),
        environment: req.environment.clone(),
        target,
        created_at: epoch_secs(),
    };
    if let Err(e) = state.store.put_release(&release) {
        return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response();
    }

    match state.controller.start(&release).await {
        Ok(rollout_id) => {
            info!(
                release = release.sequence,
                rollout = %rollout_id,
                environment = %release.environment,
                "release accepted"
            );
            (
                StatusCode::CREATED,
                ApiResponse::ok(serde_json::json!({
                    "release": release.sequence,
                    "rollout_id": rollout_id,
                    "environment": release.environment,
                    "artifact": release.artifact.to_string(),
                })),
            )
                .into_response()
        }
        Err(e @ RolloutError::Conflict { .. }) => {
            error_response(&e.to_string(), StatusCode::CONFLICT).into_response()
        }
        Err(e) => {
            error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response()
        }
    }
}

/// GET /api/v1/releases
pub async fn list_releases(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_releases() {
        Ok(releases) => ApiResponse::ok(releases).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── History ────────────────────────────────────────────────────

/// GET /api/v1/history
pub async fn list_history(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_history() {
        Ok(entries) => ApiResponse::ok(entries).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

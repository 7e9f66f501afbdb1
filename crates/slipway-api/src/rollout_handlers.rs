//! REST API handlers for rollout management.
//!
//! Provides endpoints to list, inspect, and cancel rollouts, and to
//! request a manual rollback to a prior release.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use slipway_rollout::RolloutError;

use crate::ApiState;

/// Response wrapper for rollout endpoints.
#[derive(serde::Serialize)]
struct RolloutResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> RolloutResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn rollout_error(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(RolloutResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

/// GET /api/v1/rollouts
pub async fn list_rollouts(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_rollouts() {
        Ok(rollouts) => RolloutResponse::ok(rollouts).into_response(),
        Err(e) => rollout_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/rollouts/:id
pub async fn get_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_rollout(&id) {
        Ok(Some(rollout)) => RolloutResponse::ok(rollout).into_response(),
        Ok(None) => rollout_error("rollout not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => rollout_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/rollouts/:id/cancel
pub async fn cancel_rollout(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.controller.cancel(&id).await {
        Ok(cancelled) => RolloutResponse::ok(serde_json::json!({
            "rollout_id": id,
            "cancelled": cancelled,
        }))
        .into_response(),
        Err(RolloutError::RolloutNotFound(_)) => {
            rollout_error("rollout not found", StatusCode::NOT_FOUND).into_response()
        }
        Err(e) => rollout_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// Request body for a manual rollback.
#[derive(serde::Deserialize)]
pub struct RollbackRequest {
    pub release_seq: u64,
    pub environment: String,
}

/// POST /api/v1/rollbacks
pub async fn create_rollback(
    State(state): State<ApiState>,
    Json(req): Json<RollbackRequest>,
) -> impl IntoResponse {
    match state
        .controller
        .rollback_to(req.release_seq, &req.environment)
        .await
    {
        Ok(rollout_id) => (
            StatusCode::CREATED,
            RolloutResponse::ok(serde_json::json!({
                "release": req.release_seq,
                "rollout_id": rollout_id,
                "environment": req.environment,
            })),
        )
            .into_response(),
        Err(e @ RolloutError::Conflict { .. }) => {
            rollout_error(&e.to_string(), StatusCode::CONFLICT).into_response()
        }
        Err(e @ RolloutError::ReleaseNotFound(_)) => {
            rollout_error(&e.to_string(), StatusCode::NOT_FOUND).into_response()
        }
        Err(e @ RolloutError::WrongEnvironment { .. }) => {
            rollout_error(&e.to_string(), StatusCode::UNPROCESSABLE_ENTITY).into_response()
        }
        Err(e) => rollout_error(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

//! slipway-api — REST API for Slipway.
//!
//! Provides axum route handlers for cutting releases, watching and
//! cancelling rollouts, and requesting manual rollbacks.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/releases` | Resolve a revision and start a rollout |
//! | GET | `/api/v1/releases` | List releases |
//! | GET | `/api/v1/rollouts` | List rollouts |
//! | GET | `/api/v1/rollouts/:id` | Get rollout state |
//! | POST | `/api/v1/rollouts/:id/cancel` | Cancel a running rollout |
//! | POST | `/api/v1/rollbacks` | Roll back to a prior release |
//! | GET | `/api/v1/history` | List rollout outcomes |

pub mod handlers;
pub mod rollout_handlers;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use slipway_compose::Composer;
use slipway_resolver::Resolver;
use slipway_rollout::RolloutController;
use slipway_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub controller: Arc<RolloutController>,
    pub resolver: Arc<Resolver>,
    pub composer: Arc<Composer>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/releases",
            get(handlers::list_releases).post(handlers::create_release),
        )
        .route("/history", get(handlers::list_history))
        .route("/rollouts", get(rollout_handlers::list_rollouts))
        .route("/rollouts/{id}", get(rollout_handlers::get_rollout))
        .route(
            "/rollouts/{id}/cancel",
            post(rollout_handlers::cancel_rollout),
        )
        .route("/rollbacks", post(rollout_handlers::create_rollback))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}

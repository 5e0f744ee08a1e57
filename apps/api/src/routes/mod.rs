pub mod health;

use axum::{
    routing::{get, post},
    Router,
};

use crate::automation::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Applications
        .route(
            "/api/v1/applications",
            post(handlers::handle_start_application),
        )
        .route(
            "/api/v1/applications/:code",
            get(handlers::handle_get_application),
        )
        .route(
            "/api/v1/applications/:code/continue",
            post(handlers::handle_continue_application),
        )
        // Profile
        .route(
            "/api/v1/profile",
            get(handlers::handle_get_profile).put(handlers::handle_put_profile),
        )
        .with_state(state)
}

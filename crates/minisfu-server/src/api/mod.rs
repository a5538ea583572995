mod signal;

use crate::state::AppState;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health check
        .route("/health", get(|| async { "OK" }))
        // Signalling: one offer in, one complete answer out
        .route("/publish", post(signal::publish))
        .route("/subscribe", post(signal::subscribe))
        .route("/status", get(signal::status))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

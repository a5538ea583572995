//! minisfu server library
//!
//! This module exposes the server components for testing and embedding.

pub mod api;
pub mod error;
pub mod sfu;
pub mod state;

/// Create and configure the server application
pub fn create_app(config: state::Config) -> axum::Router {
    let app_state = state::AppState::new(config);
    api::create_router(app_state)
}

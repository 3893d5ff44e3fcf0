use super::handlers;
use super::state::AppState;
use axum::{
    routing::{get, post, put},
    Router,
};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(handlers::health_check))
        // Session lifecycle
        .route("/session/connect", post(handlers::connect))
        .route("/session/disconnect", post(handlers::disconnect))
        // Conversation
        .route("/session/text", post(handlers::send_text))
        .route("/session/preferences", put(handlers::update_preferences))
        // Session queries
        .route("/session/status", get(handlers::get_status))
        .route("/session/transcript", get(handlers::get_transcript))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

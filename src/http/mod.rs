//! HTTP API server for external control
//!
//! This module provides a REST API over the voice session:
//! - POST /session/connect - Open the realtime session
//! - POST /session/disconnect - Tear it down, returning final stats
//! - POST /session/text - Send a typed turn
//! - PUT /session/preferences - Update local playback/display toggles
//! - GET /session/status - Query status and live stats
//! - GET /session/transcript - Get the conversation transcript
//! - GET /health - Health check

mod handlers;
mod routes;
mod state;

pub use routes::create_router;
pub use state::AppState;

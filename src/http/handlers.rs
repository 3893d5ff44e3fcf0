use super::state::AppState;
use crate::error::Error;
use crate::session::{Preferences, SessionStats, SessionStatus};
use crate::transcript::TranscriptEntry;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SessionStatus,
    pub user_speaking: bool,
    pub preferences: Preferences,
    pub stats: Option<SessionStats>,
    pub last_error: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DisconnectResponse {
    pub status: SessionStatus,
    pub message: String,
    /// Final stats, absent when nothing was connected
    pub stats: Option<SessionStats>,
}

#[derive(Debug, Deserialize)]
pub struct TextTurnRequest {
    pub text: String,
}

/// Partial preference update; omitted fields keep their value
#[derive(Debug, Default, Deserialize)]
pub struct PreferencesRequest {
    pub mute_assistant_audio: Option<bool>,
    pub show_transcript: Option<bool>,
    pub show_keyboard: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::NotConnected => StatusCode::CONFLICT,
        Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
        Error::AuthExpired => StatusCode::UNAUTHORIZED,
        Error::DeviceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::Connection(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn status_response(state: &AppState) -> StatusResponse {
    let session = &state.session;
    StatusResponse {
        status: session.status(),
        user_speaking: session.is_user_speaking(),
        preferences: session.preferences(),
        stats: session.stats(),
        last_error: session.last_error(),
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /session/connect
/// Open the realtime session
pub async fn connect(State(state): State<AppState>) -> impl IntoResponse {
    if state.session.is_connected() {
        return error_response(StatusCode::CONFLICT, "Session is already connected");
    }

    info!("Connecting voice session");

    match state.session.connect().await {
        Ok(()) => (StatusCode::OK, Json(status_response(&state))).into_response(),
        Err(e) => {
            error!("Failed to connect: {}", e);
            error_response(status_for(&e), format!("Failed to connect: {}", e))
        }
    }
}

/// POST /session/disconnect
/// Tear the session down; a no-op when nothing is connected
pub async fn disconnect(State(state): State<AppState>) -> impl IntoResponse {
    let stats = state.session.disconnect().await;

    let message = match &stats {
        Some(stats) => format!("Session {} disconnected", stats.session_id),
        None => "No session was connected".to_string(),
    };

    (
        StatusCode::OK,
        Json(DisconnectResponse {
            status: state.session.status(),
            message,
            stats,
        }),
    )
}

/// POST /session/text
/// Send a typed turn and request a response
pub async fn send_text(
    State(state): State<AppState>,
    Json(req): Json<TextTurnRequest>,
) -> impl IntoResponse {
    match state.session.send_text(&req.text).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(status_for(&e), e.to_string()),
    }
}

/// PUT /session/preferences
/// Update local rendering toggles
pub async fn update_preferences(
    State(state): State<AppState>,
    Json(req): Json<PreferencesRequest>,
) -> impl IntoResponse {
    let current = state.session.preferences();
    let updated = Preferences {
        mute_assistant_audio: req
            .mute_assistant_audio
            .unwrap_or(current.mute_assistant_audio),
        show_transcript: req.show_transcript.unwrap_or(current.show_transcript),
        show_keyboard: req.show_keyboard.unwrap_or(current.show_keyboard),
    };

    state.session.set_preferences(updated);
    (StatusCode::OK, Json(updated))
}

/// GET /session/status
pub async fn get_status(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(status_response(&state)))
}

/// GET /session/transcript
/// Transcript of the live session (empty when disconnected)
pub async fn get_transcript(State(state): State<AppState>) -> impl IntoResponse {
    let transcript: Vec<TranscriptEntry> = state.session.transcript();
    (StatusCode::OK, Json(transcript))
}

/// GET /health
/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

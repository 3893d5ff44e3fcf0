// Integration tests for the HTTP control API
//
// Requests go straight into the router with `tower::ServiceExt::oneshot`.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use loqa_realtime::audio::SyntheticDevices;
use loqa_realtime::credential::StaticCredentialProvider;
use loqa_realtime::http::{create_router, AppState};
use loqa_realtime::session::{SessionConfig, VoiceSession};
use loqa_realtime::signaling::{MemoryTransport, RemotePeer};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tower::ServiceExt;

fn app_with(devices: SyntheticDevices) -> (Router, UnboundedReceiver<RemotePeer>) {
    let (transport, peers) = MemoryTransport::new();
    let session = VoiceSession::new(
        SessionConfig::default(),
        Arc::new(devices),
        Arc::new(transport),
        Arc::new(StaticCredentialProvider::new(
            "test-key",
            chrono::Duration::hours(1),
        )),
    );
    (create_router(AppState::new(Arc::new(session))), peers)
}

fn app() -> (Router, UnboundedReceiver<RemotePeer>) {
    app_with(SyntheticDevices::new())
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    let request = match body {
        Some(body) => request.body(Body::from(body.to_string())).unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

/// Connect through the API while a task plays the backend handshake
async fn connect(app: &Router, mut peers: UnboundedReceiver<RemotePeer>) -> RemotePeer {
    let backend = tokio::spawn(async move {
        let mut peer = peers.recv().await.expect("transport opened");
        peer.accept().await.expect("session.update received");
        peer
    });

    let (status, body) = call(app, "POST", "/session/connect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");

    backend.await.unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _peers) = app();

    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_status_when_disconnected() {
    let (app, _peers) = app();

    let (status, body) = call(&app, "GET", "/session/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["user_speaking"], false);
    assert_eq!(body["stats"], Value::Null);
    assert_eq!(body["preferences"]["show_transcript"], true);
}

#[tokio::test]
async fn test_session_lifecycle() {
    let (app, peers) = app();
    let mut peer = connect(&app, peers).await;

    // A second connect conflicts
    let (status, _) = call(&app, "POST", "/session/connect", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = call(
        &app,
        "POST",
        "/session/text",
        Some(json!({ "text": "add oat milk to the list" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let (_, transcript) = call(&app, "GET", "/session/transcript", None).await;
    assert_eq!(transcript[0]["role"], "user");
    assert_eq!(transcript[0]["text"], "add oat milk to the list");
    assert_eq!(transcript[0]["is_streaming"], false);

    let (status, body) = call(&app, "GET", "/session/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "connected");
    assert_eq!(body["stats"]["transcript_entries"], 1);

    let (status, body) = call(&app, "POST", "/session/disconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "disconnected");
    assert_eq!(body["stats"]["status"], "disconnected");
    assert!(peer.is_closed());

    // Disconnecting again is a no-op
    let (status, body) = call(&app, "POST", "/session/disconnect", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"], Value::Null);
}

#[tokio::test]
async fn test_text_turn_validation() {
    let (app, _peers) = app();

    let (status, body) = call(&app, "POST", "/session/text", Some(json!({ "text": "hi" }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("not connected"));

    let (status, _) = call(&app, "POST", "/session/text", Some(json!({ "text": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_partial_preference_update() {
    let (app, _peers) = app();

    let (status, body) = call(
        &app,
        "PUT",
        "/session/preferences",
        Some(json!({ "mute_assistant_audio": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "mute_assistant_audio": true,
            "show_transcript": true,
            "show_keyboard": false
        })
    );

    let (_, body) = call(
        &app,
        "PUT",
        "/session/preferences",
        Some(json!({ "show_keyboard": true })),
    )
    .await;
    assert_eq!(body["mute_assistant_audio"], true);
    assert_eq!(body["show_keyboard"], true);
}

#[tokio::test]
async fn test_connect_with_denied_microphone() {
    let (app, _peers) = app_with(SyntheticDevices::new().deny_microphone());

    let (status, body) = call(&app, "POST", "/session/connect", None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].as_str().unwrap().contains("permission denied"));

    let (_, body) = call(&app, "GET", "/session/status", None).await;
    assert_eq!(body["status"], "error");
    assert!(body["last_error"].is_string());
}

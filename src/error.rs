//! Error types for the realtime engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the realtime engine
#[derive(Debug, Error)]
pub enum Error {
    /// Microphone access was refused
    #[error("microphone permission denied: {0}")]
    PermissionDenied(String),

    /// No usable audio device
    #[error("audio device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Handshake or transport failure
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed or out-of-sequence inbound message
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Device-level render failure
    #[error("playback error: {0}")]
    Playback(String),

    /// The realtime credential expired or was rejected
    #[error("realtime credential expired")]
    AuthExpired,

    /// Operation requires a connected session
    #[error("session is not connected")]
    NotConnected,

    /// Rejected caller input
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// WAV decoding error
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
}

impl Error {
    /// Whether this error ends the session.
    ///
    /// Fatal errors force a full teardown; protocol and playback errors are
    /// recovered locally by discarding the offending event.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::PermissionDenied(_)
                | Error::DeviceUnavailable(_)
                | Error::Connection(_)
                | Error::AuthExpired
        )
    }
}

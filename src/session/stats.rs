use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of the voice session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Local rendering toggles; never change the wire protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    /// Receive assistant audio but don't play it
    pub mute_assistant_audio: bool,
    pub show_transcript: bool,
    pub show_keyboard: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            mute_assistant_audio: false,
            show_transcript: true,
            show_keyboard: false,
        }
    }
}

/// Statistics about a voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub session_id: String,

    pub status: SessionStatus,

    /// When the session connected
    pub started_at: DateTime<Utc>,

    /// Total duration in seconds
    pub duration_secs: f64,

    /// `input_audio_buffer.append` frames sent
    pub frames_sent: u64,

    /// Assistant chunks rendered to the end
    pub chunks_played: usize,

    /// Assistant chunks dropped (barge-in, mute, render failure, late arrival)
    pub chunks_discarded: usize,

    /// Barge-in truncations sent
    pub truncations: usize,

    pub render_failures: usize,

    /// Inbound messages dropped as malformed or out of sequence
    pub protocol_errors: u64,

    pub conversation_items: usize,

    pub transcript_entries: usize,

    /// Most recent error reported by the backend
    pub last_error: Option<String>,
}

use serde::{Deserialize, Serialize};

/// Conversation participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Messages sent to the realtime backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionSettings },

    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        /// Base64 PCM16 frame
        audio: String,
    },

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItemParam },

    #[serde(rename = "response.create")]
    ResponseCreate {},

    #[serde(rename = "conversation.item.truncate")]
    ConversationItemTruncate {
        item_id: String,
        content_index: u32,
        audio_end_ms: u64,
    },
}

impl ClientEvent {
    /// A user text message
    pub fn user_text(text: impl Into<String>) -> Self {
        ClientEvent::ConversationItemCreate {
            item: ConversationItemParam {
                kind: "message".to_string(),
                role: Role::User,
                content: vec![ContentPart {
                    kind: "input_text".to_string(),
                    text: text.into(),
                }],
            },
        }
    }

    pub fn truncate(item_id: impl Into<String>, audio_end_ms: u64) -> Self {
        ClientEvent::ConversationItemTruncate {
            item_id: item_id.into(),
            content_index: 0,
            audio_end_ms,
        }
    }

    /// Wire name of this event
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::SessionUpdate { .. } => "session.update",
            ClientEvent::InputAudioBufferAppend { .. } => "input_audio_buffer.append",
            ClientEvent::ConversationItemCreate { .. } => "conversation.item.create",
            ClientEvent::ResponseCreate {} => "response.create",
            ClientEvent::ConversationItemTruncate { .. } => "conversation.item.truncate",
        }
    }
}

/// Body of `session.update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub audio: AudioSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    pub input: AudioInputSettings,
    pub output: AudioOutputSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioInputSettings {
    pub format: AudioFormat,
    pub transcription: TranscriptionSettings,
    pub turn_detection: TurnDetection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioOutputSettings {
    pub format: AudioFormat,
    pub voice: String,
}

/// PCM16 at a fixed rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub rate: u32,
}

impl AudioFormat {
    pub fn pcm16(rate: u32) -> Self {
        Self {
            kind: "audio/pcm".to_string(),
            rate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub model: String,
}

/// Server-side voice activity detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItemParam {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: Role,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Messages received from the realtime backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated {
        #[serde(default)]
        session: Option<RemoteSession>,
    },

    #[serde(rename = "session.updated")]
    SessionUpdated {
        #[serde(default)]
        session: Option<RemoteSession>,
    },

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        audio_start_ms: Option<u64>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        audio_end_ms: Option<u64>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    UserTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscriptCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    #[serde(rename = "response.output_audio_transcript.delta")]
    AssistantTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        delta: String,
    },

    #[serde(rename = "response.output_audio_transcript.done")]
    AssistantTranscriptDone {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    #[serde(rename = "response.output_audio.delta")]
    AssistantAudioDelta {
        #[serde(default)]
        item_id: Option<String>,
        /// Base64 PCM16 frame
        delta: String,
    },

    #[serde(rename = "response.output_audio.done")]
    AssistantAudioDone {
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.done")]
    ResponseDone {
        #[serde(default)]
        response: Option<serde_json::Value>,
    },

    #[serde(rename = "error")]
    Error { error: RemoteError },

    /// Any event type this engine does not act on
    #[serde(other)]
    Unknown,
}

impl ServerEvent {
    /// Wire name of this event
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated { .. } => "session.created",
            ServerEvent::SessionUpdated { .. } => "session.updated",
            ServerEvent::SpeechStarted { .. } => "input_audio_buffer.speech_started",
            ServerEvent::SpeechStopped { .. } => "input_audio_buffer.speech_stopped",
            ServerEvent::UserTranscriptDelta { .. } => {
                "conversation.item.input_audio_transcription.delta"
            }
            ServerEvent::UserTranscriptCompleted { .. } => {
                "conversation.item.input_audio_transcription.completed"
            }
            ServerEvent::AssistantTranscriptDelta { .. } => "response.output_audio_transcript.delta",
            ServerEvent::AssistantTranscriptDone { .. } => "response.output_audio_transcript.done",
            ServerEvent::AssistantAudioDelta { .. } => "response.output_audio.delta",
            ServerEvent::AssistantAudioDone { .. } => "response.output_audio.done",
            ServerEvent::ResponseDone { .. } => "response.done",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Unknown => "unknown",
        }
    }
}

/// Session descriptor echoed by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteSession {
    #[serde(default)]
    pub id: Option<String>,
}

/// Error payload reported by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: String,
}

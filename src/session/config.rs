use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::AudioDeviceConfig;
use crate::signaling::messages::{
    AudioFormat, AudioInputSettings, AudioOutputSettings, AudioSettings, ClientEvent,
    SessionSettings, TranscriptionSettings, TurnDetection,
};

/// Server-side voice activity detection thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// Detection sensitivity (0.0 to 1.0)
    pub threshold: f32,
    /// Audio kept from before detected speech
    pub prefix_padding_ms: u32,
    /// Silence that ends the user's turn
    pub silence_duration_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Configuration for a realtime voice session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Wire sample rate for both directions
    pub sample_rate: u32,

    /// Samples per `input_audio_buffer.append` frame
    /// Default: 2048 (85ms at 24kHz)
    pub frame_samples: usize,

    /// Device buffer size in milliseconds
    pub device_buffer_ms: u64,

    /// Realtime model
    pub model: String,

    /// Assistant voice
    pub voice: String,

    /// Model transcribing the user's speech
    pub transcription_model: String,

    /// System instructions sent with the session configuration
    pub instructions: Option<String>,

    /// Seed user turn sent on connect so the assistant speaks first
    pub greeting: Option<String>,

    pub vad: VadConfig,

    /// How long the backend gets to complete the handshake
    pub handshake_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            frame_samples: 2048,
            device_buffer_ms: 20,
            model: "gpt-realtime".to_string(),
            voice: "alloy".to_string(),
            transcription_model: "gpt-4o-mini-transcribe".to_string(),
            instructions: None,
            greeting: Some("Hello".to_string()),
            vad: VadConfig::default(),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

impl SessionConfig {
    /// Device settings derived from the session format
    pub fn device_config(&self) -> AudioDeviceConfig {
        AudioDeviceConfig {
            sample_rate: self.sample_rate,
            channels: 1,
            buffer_duration_ms: self.device_buffer_ms,
        }
    }

    /// The `session.update` answering the backend's `session.created`
    pub fn session_update(&self) -> ClientEvent {
        ClientEvent::SessionUpdate {
            session: SessionSettings {
                kind: "realtime".to_string(),
                model: Some(self.model.clone()),
                instructions: self.instructions.clone(),
                audio: AudioSettings {
                    input: AudioInputSettings {
                        format: AudioFormat::pcm16(self.sample_rate),
                        transcription: TranscriptionSettings {
                            model: self.transcription_model.clone(),
                        },
                        turn_detection: TurnDetection {
                            kind: "server_vad".to_string(),
                            threshold: self.vad.threshold,
                            prefix_padding_ms: self.vad.prefix_padding_ms,
                            silence_duration_ms: self.vad.silence_duration_ms,
                        },
                    },
                    output: AudioOutputSettings {
                        format: AudioFormat::pcm16(self.sample_rate),
                        voice: self.voice.clone(),
                    },
                },
            },
        }
    }
}

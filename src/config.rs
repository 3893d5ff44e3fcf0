use std::time::Duration;

use serde::Deserialize;

use crate::audio::{AudioBackendFactory, AudioSink, AudioSource};
use crate::error::{Error, Result};
use crate::session::{SessionConfig, VadConfig};

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "REALTIME_API_KEY";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub service: ServiceConfig,
    pub realtime: RealtimeConfig,
    pub audio: AudioConfig,
    pub vad: VadConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "loqa-realtime".to_string(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub url: String,
    pub model: String,
    pub voice: String,
    pub transcription_model: String,
    pub instructions: Option<String>,
    /// Seed user turn; empty disables it
    pub greeting: String,
    pub handshake_timeout_ms: u64,
    /// Falls back to `REALTIME_API_KEY` when unset
    pub api_key: Option<String>,
    pub credential_ttl_secs: i64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            model: "gpt-realtime".to_string(),
            voice: "alloy".to_string(),
            transcription_model: "gpt-4o-mini-transcribe".to_string(),
            instructions: None,
            greeting: "Hello".to_string(),
            handshake_timeout_ms: 10_000,
            api_key: None,
            credential_ttl_secs: 600,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub frame_samples: usize,
    pub buffer_duration_ms: u64,
    /// `microphone`, `silence`, or a path to a WAV file
    pub input: String,
    /// `speaker` or `null`
    pub output: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,
            frame_samples: 2048,
            buffer_duration_ms: 20,
            input: "microphone".to_string(),
            output: "speaker".to_string(),
        }
    }
}

impl Config {
    /// Load `path` (any format the config crate knows, extension optional)
    /// with `LOQA_` environment overrides, e.g. `LOQA_REALTIME__MODEL`.
    /// A missing file yields the defaults.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("LOQA")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        settings
            .try_deserialize()
            .map_err(|e| Error::Config(e.to_string()))
    }

    pub fn session_config(&self) -> SessionConfig {
        let greeting = Some(self.realtime.greeting.trim())
            .filter(|greeting| !greeting.is_empty())
            .map(str::to_string);

        SessionConfig {
            sample_rate: self.audio.sample_rate,
            frame_samples: self.audio.frame_samples,
            device_buffer_ms: self.audio.buffer_duration_ms,
            model: self.realtime.model.clone(),
            voice: self.realtime.voice.clone(),
            transcription_model: self.realtime.transcription_model.clone(),
            instructions: self.realtime.instructions.clone(),
            greeting,
            vad: self.vad.clone(),
            handshake_timeout: Duration::from_millis(self.realtime.handshake_timeout_ms),
        }
    }

    pub fn audio_source(&self) -> AudioSource {
        match self.audio.input.as_str() {
            "microphone" | "mic" => AudioSource::Microphone,
            "silence" => AudioSource::Silence,
            path => AudioSource::File(path.to_string()),
        }
    }

    pub fn audio_sink(&self) -> Result<AudioSink> {
        match self.audio.output.as_str() {
            "speaker" => Ok(AudioSink::Speaker),
            "null" | "none" => Ok(AudioSink::Null),
            other => Err(Error::Config(format!("unknown audio output: {other}"))),
        }
    }

    pub fn audio_factory(&self) -> Result<AudioBackendFactory> {
        Ok(AudioBackendFactory::new(self.audio_source(), self.audio_sink()?))
    }

    /// Configured API key, or the `REALTIME_API_KEY` environment variable
    pub fn api_key(&self) -> Result<String> {
        match self.realtime.api_key.as_deref().filter(|key| !key.is_empty()) {
            Some(key) => Ok(key.to_string()),
            None => std::env::var(API_KEY_ENV).map_err(|_| {
                Error::Config(format!(
                    "no realtime API key: set realtime.api_key or {API_KEY_ENV}"
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = Config::load("/nonexistent/loqa-realtime").unwrap();
        let session = cfg.session_config();

        assert_eq!(session.sample_rate, 24000);
        assert_eq!(session.frame_samples, 2048);
        assert_eq!(session.greeting.as_deref(), Some("Hello"));
        assert_eq!(session.vad, VadConfig::default());
        assert_eq!(session.handshake_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_load_toml_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[realtime]
voice = "verse"
greeting = ""
handshake_timeout_ms = 2500

[audio]
input = "silence"
output = "null"

[vad]
threshold = 0.7
prefix_padding_ms = 200
silence_duration_ms = 800
"#
        )
        .unwrap();

        let cfg = Config::load(file.path().to_str().unwrap()).unwrap();
        let session = cfg.session_config();

        assert_eq!(session.voice, "verse");
        assert_eq!(session.greeting, None);
        assert_eq!(session.handshake_timeout, Duration::from_millis(2500));
        assert_eq!(session.vad.silence_duration_ms, 800);
        assert_eq!(cfg.audio_source(), AudioSource::Silence);
        assert_eq!(cfg.audio_sink().unwrap(), AudioSink::Null);
    }

    #[test]
    fn test_wav_path_input() {
        let cfg = Config {
            audio: AudioConfig {
                input: "fixtures/hello.wav".to_string(),
                ..AudioConfig::default()
            },
            ..Config::default()
        };
        assert_eq!(
            cfg.audio_source(),
            AudioSource::File("fixtures/hello.wav".to_string())
        );
    }
}

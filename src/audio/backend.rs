use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::error::{Error, Result};

/// Audio sample data (f32, interleaved when multi-channel)
#[derive(Debug, Clone)]
pub struct AudioFrame {
    /// Raw audio samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
    /// Number of channels
    pub channels: u16,
    /// Timestamp in milliseconds since capture started
    pub timestamp_ms: u64,
}

/// Configuration shared by capture and playback devices
#[derive(Debug, Clone)]
pub struct AudioDeviceConfig {
    /// Session sample rate (the wire rate)
    pub sample_rate: u32,
    /// Channel count requested from the device
    pub channels: u16,
    /// Capture buffer size in milliseconds (affects latency)
    pub buffer_duration_ms: u64,
}

impl Default for AudioDeviceConfig {
    fn default() -> Self {
        Self {
            sample_rate: 24000,     // Realtime PCM16 rate
            channels: 1,            // Mono
            buffer_duration_ms: 20, // 20ms device buffers
        }
    }
}

/// Microphone side of the audio device adapter
///
/// Implementations:
/// - cpal microphone (`cpal-audio` feature)
/// - WAV file replayed at real-time cadence
/// - synthetic frames (tests, headless runs)
#[async_trait::async_trait]
pub trait CaptureDevice: Send + Sync {
    /// Start capturing audio
    ///
    /// Returns a channel receiver that will receive audio frames
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>>;

    /// Stop capturing and release the device. Safe to call repeatedly.
    async fn stop(&mut self) -> Result<()>;

    /// Check if the device is currently capturing
    fn is_capturing(&self) -> bool;

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Signal resolved when a scheduled buffer finishes.
///
/// `Ok(Ok(()))` means the buffer rendered to the end, `Ok(Err(_))` is a
/// render failure, and a closed channel means playback was stopped.
pub type PlaybackCompletion = oneshot::Receiver<Result<()>>;

/// Speaker side of the audio device adapter
///
/// At most one buffer is rendered at a time. Scheduling while a buffer is
/// active replaces it.
pub trait PlaybackDevice: Send + Sync {
    /// Begin rendering a mono buffer at the session rate
    fn schedule(&self, samples: Vec<f32>) -> Result<PlaybackCompletion>;

    /// Hard-stop the active buffer, if any
    fn stop(&self);

    /// Stop and release the device. Safe to call repeatedly.
    fn release(&self);

    /// Device name for logging
    fn name(&self) -> &str;
}

/// Acquires the two independently lifecycled audio resources of a session
#[async_trait::async_trait]
pub trait AudioDevices: Send + Sync {
    /// Acquire the microphone
    ///
    /// Fails with `PermissionDenied` or `DeviceUnavailable`.
    async fn acquire_capture(&self, config: &AudioDeviceConfig) -> Result<Box<dyn CaptureDevice>>;

    /// Acquire the speaker
    async fn acquire_playback(&self, config: &AudioDeviceConfig)
        -> Result<Arc<dyn PlaybackDevice>>;
}

/// Audio input type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSource {
    /// Microphone input (`cpal-audio` feature)
    Microphone,
    /// WAV file replayed at real-time cadence
    File(String),
    /// Continuous silence
    Silence,
}

/// Audio output type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioSink {
    /// Default output device (`cpal-audio` feature)
    Speaker,
    /// Discard audio, keeping real-time pacing
    Null,
}

/// Audio device factory for a configured source and sink
#[derive(Debug, Clone)]
pub struct AudioBackendFactory {
    source: AudioSource,
    sink: AudioSink,
}

impl AudioBackendFactory {
    pub fn new(source: AudioSource, sink: AudioSink) -> Self {
        Self { source, sink }
    }
}

#[async_trait::async_trait]
impl AudioDevices for AudioBackendFactory {
    async fn acquire_capture(&self, config: &AudioDeviceConfig) -> Result<Box<dyn CaptureDevice>> {
        match &self.source {
            AudioSource::Microphone => {
                #[cfg(feature = "cpal-audio")]
                {
                    let device = super::cpal_device::CpalCapture::open(config.clone())?;
                    Ok(Box::new(device))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    Err(Error::DeviceUnavailable(
                        "microphone capture requires the cpal-audio feature".to_string(),
                    ))
                }
            }

            AudioSource::File(path) => {
                let device = super::file::FileCapture::open(path, config.clone())?;
                Ok(Box::new(device))
            }

            AudioSource::Silence => Ok(Box::new(super::synthetic::SyntheticCapture::silence(
                config.clone(),
            ))),
        }
    }

    async fn acquire_playback(
        &self,
        config: &AudioDeviceConfig,
    ) -> Result<Arc<dyn PlaybackDevice>> {
        match self.sink {
            AudioSink::Speaker => {
                #[cfg(feature = "cpal-audio")]
                {
                    let device = super::cpal_device::CpalPlayback::open(config.clone())?;
                    Ok(Arc::new(device))
                }

                #[cfg(not(feature = "cpal-audio"))]
                {
                    Err(Error::DeviceUnavailable(
                        "speaker playback requires the cpal-audio feature".to_string(),
                    ))
                }
            }

            AudioSink::Null => Ok(Arc::new(super::synthetic::SyntheticPlayback::new(
                config.sample_rate,
            ))),
        }
    }
}

use std::path::Path;

use hound::{SampleFormat, WavReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::info;

use super::backend::{AudioDeviceConfig, AudioFrame, CaptureDevice};
use crate::error::{Error, Result};

/// A WAV file loaded into memory as f32 samples
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let reader = WavReader::open(path)?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<std::result::Result<Vec<_>, _>>()?,
            SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        let duration_seconds =
            samples.len() as f64 / (spec.sample_rate as f64 * spec.channels.max(1) as f64);

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            spec.sample_rate,
            spec.channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate: spec.sample_rate,
            channels: spec.channels,
            samples,
        })
    }
}

/// Capture device that replays a WAV file at real-time cadence
///
/// Frames keep the file's native rate and channel layout; the capture
/// pipeline normalizes them to the session format.
pub struct FileCapture {
    file: AudioFile,
    config: AudioDeviceConfig,
    task: Option<JoinHandle<()>>,
    capturing: bool,
}

impl FileCapture {
    pub fn open(path: impl AsRef<Path>, config: AudioDeviceConfig) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::DeviceUnavailable(format!(
                "audio file not found: {}",
                path.display()
            )));
        }

        Ok(Self {
            file: AudioFile::open(path)?,
            config,
            task: None,
            capturing: false,
        })
    }
}

#[async_trait::async_trait]
impl CaptureDevice for FileCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            return Err(Error::DeviceUnavailable("already capturing".to_string()));
        }

        info!("Replaying {} as capture input", self.file.path);

        let (tx, rx) = mpsc::channel(64);
        let buffer_ms = self.config.buffer_duration_ms.max(1);
        let channels = self.file.channels.max(1);
        let sample_rate = self.file.sample_rate;
        let frame_len =
            ((sample_rate as u64 * buffer_ms / 1000).max(1) * channels as u64) as usize;
        let samples = self.file.samples.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(buffer_ms));

            for (index, chunk) in samples.chunks(frame_len).enumerate() {
                ticker.tick().await;
                let frame = AudioFrame {
                    samples: chunk.to_vec(),
                    sample_rate,
                    channels,
                    timestamp_ms: index as u64 * buffer_ms,
                };
                if tx.send(frame).await.is_err() {
                    return;
                }
            }

            info!("Audio file replay finished");
        });

        self.task = Some(task);
        self.capturing = true;

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.capturing = false;
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "WAV file"
    }
}

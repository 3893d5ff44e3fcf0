use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::audio::{AudioFrame, CaptureDevice};
use crate::codec::{self, Resampler};
use crate::error::{Error, Result};
use crate::signaling::{ClientEvent, SignalingSender};

/// Re-slices arbitrary device buffers into fixed-size frames
struct Framer {
    frame_samples: usize,
    buffer: Vec<f32>,
}

impl Framer {
    fn new(frame_samples: usize) -> Self {
        let frame_samples = frame_samples.max(1);
        Self {
            frame_samples,
            buffer: Vec::with_capacity(frame_samples * 2),
        }
    }

    fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        self.buffer.extend_from_slice(samples);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.frame_samples {
            let rest = self.buffer.split_off(self.frame_samples);
            frames.push(std::mem::replace(&mut self.buffer, rest));
        }
        frames
    }

    fn flush(&mut self) -> Option<Vec<f32>> {
        if self.buffer.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.buffer))
        }
    }
}

/// Brings device frames to mono at the session rate
///
/// The resampler lives for the whole stream so interpolation spans device
/// buffers. A change of source rate flushes the old resampler first.
struct Normalizer {
    target_rate: u32,
    resampler: Option<Resampler>,
}

impl Normalizer {
    fn new(target_rate: u32) -> Self {
        Self {
            target_rate,
            resampler: None,
        }
    }

    fn push(&mut self, frame: AudioFrame) -> Vec<f32> {
        let frame = codec::downmix_to_mono(frame);
        let mut output = Vec::new();

        let current_rate = self.resampler.as_ref().map(Resampler::from_rate);
        if current_rate != Some(frame.sample_rate) {
            if let Some(mut previous) = self.resampler.take() {
                output.extend(previous.flush());
            }
            if frame.sample_rate != self.target_rate {
                info!(
                    "Resampling capture from {}Hz to {}Hz",
                    frame.sample_rate, self.target_rate
                );
            }
            self.resampler = Some(Resampler::new(frame.sample_rate, self.target_rate));
        }

        if let Some(resampler) = self.resampler.as_mut() {
            output.extend(resampler.process(&frame.samples));
        }
        output
    }

    fn flush(&mut self) -> Vec<f32> {
        self.resampler
            .as_mut()
            .map(Resampler::flush)
            .unwrap_or_default()
    }
}

/// Streams microphone audio to the backend as `input_audio_buffer.append`
///
/// Capture is always on while the session is connected; the backend's VAD
/// decides what counts as speech.
pub struct CapturePipeline {
    device: Option<Box<dyn CaptureDevice>>,
    task: Option<JoinHandle<()>>,
    frames_sent: Arc<AtomicU64>,
}

impl CapturePipeline {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        Self {
            device: Some(device),
            task: None,
            frames_sent: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start the device and the send loop
    pub async fn start(
        &mut self,
        sender: SignalingSender,
        sample_rate: u32,
        frame_samples: usize,
    ) -> Result<()> {
        if self.task.is_some() {
            warn!("Capture already started");
            return Ok(());
        }

        let device = self
            .device
            .as_mut()
            .ok_or_else(|| Error::DeviceUnavailable("capture device released".to_string()))?;

        let mut audio_rx = device.start().await?;
        info!("Capture started on {}", device.name());

        let frames_sent = Arc::clone(&self.frames_sent);

        let task = tokio::spawn(async move {
            let mut normalizer = Normalizer::new(sample_rate);
            let mut framer = Framer::new(frame_samples);

            while let Some(frame) = audio_rx.recv().await {
                let samples = normalizer.push(frame);

                for samples in framer.push(&samples) {
                    if !send_frame(&sender, &samples).await {
                        debug!("Signaling closed, capture loop exiting");
                        return;
                    }
                    frames_sent.fetch_add(1, Ordering::Relaxed);
                }
            }

            let mut tail = framer.push(&normalizer.flush());
            tail.extend(framer.flush());
            for samples in tail {
                if !send_frame(&sender, &samples).await {
                    break;
                }
                frames_sent.fetch_add(1, Ordering::Relaxed);
            }

            info!("Capture device stream ended");
        });

        self.task = Some(task);
        Ok(())
    }

    /// Stop the send loop and release the device. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if let Some(mut device) = self.device.take() {
            if let Err(e) = device.stop().await {
                warn!("Failed to stop capture device: {}", e);
            }
            info!("Microphone released");
        }
    }

    /// Shared counter of frames sent
    pub fn frames_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames_sent)
    }
}

async fn send_frame(sender: &SignalingSender, samples: &[f32]) -> bool {
    let event = ClientEvent::InputAudioBufferAppend {
        audio: codec::encode_frame(samples),
    };
    sender.send(&event).await.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_framer_emits_fixed_frames() {
        let mut framer = Framer::new(4);
        assert!(framer.push(&[0.1, 0.2, 0.3]).is_empty());

        let frames = framer.push(&[0.4, 0.5, 0.6, 0.7, 0.8, 0.9]);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0], vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(frames[1], vec![0.5, 0.6, 0.7, 0.8]);

        assert_eq!(framer.flush(), Some(vec![0.9]));
        assert_eq!(framer.flush(), None);
    }

    fn frame(samples: Vec<f32>, sample_rate: u32, channels: u16) -> AudioFrame {
        AudioFrame {
            samples,
            sample_rate,
            channels,
            timestamp_ms: 0,
        }
    }

    #[test]
    fn test_normalizer_passes_session_rate_through() {
        let mut normalizer = Normalizer::new(24000);
        let out = normalizer.push(frame(vec![0.1, 0.2, 0.3], 24000, 1));
        assert_eq!(out, vec![0.1, 0.2, 0.3]);
        assert!(normalizer.flush().is_empty());
    }

    #[test]
    fn test_normalizer_resamples_across_buffers() {
        // 100ms of 44.1kHz stereo in 20ms device buffers
        let mut normalizer = Normalizer::new(24000);
        let mut total = 0;
        for _ in 0..5 {
            total += normalizer.push(frame(vec![0.25; 882 * 2], 44100, 2)).len();
        }
        total += normalizer.flush().len();
        assert_eq!(total, 2400);
    }

    #[test]
    fn test_normalizer_upsamples_16k() {
        let mut normalizer = Normalizer::new(24000);
        let mut out = Vec::new();
        for _ in 0..5 {
            out.extend(normalizer.push(frame(vec![0.5; 320], 16000, 1)));
        }
        out.extend(normalizer.flush());
        assert_eq!(out.len(), 2400);
        assert!(out.iter().all(|s| (s - 0.5).abs() < 1e-6));
    }
}

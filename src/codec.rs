//! Conversion between device samples and wire frames
//!
//! The wire format is PCM16 little-endian mono, base64-encoded inside JSON
//! messages. Devices work in f32 samples in `[-1.0, 1.0]`.

use base64::Engine;

use crate::audio::AudioFrame;
use crate::error::{Error, Result};

/// Convert f32 samples to 16-bit PCM, clamping out-of-range input
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Convert 16-bit PCM to f32 samples
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

/// Encode f32 samples as a base64 PCM16 frame
pub fn encode_frame(samples: &[f32]) -> String {
    let pcm_bytes: Vec<u8> = f32_to_pcm16(samples)
        .iter()
        .flat_map(|s| s.to_le_bytes())
        .collect();

    base64::engine::general_purpose::STANDARD.encode(pcm_bytes)
}

/// Decode a base64 PCM16 frame into f32 samples
pub fn decode_frame(encoded: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| Error::Protocol(format!("invalid base64 audio: {e}")))?;

    if bytes.len() % 2 != 0 {
        return Err(Error::Protocol(format!(
            "PCM16 frame has odd byte length {}",
            bytes.len()
        )));
    }

    let pcm: Vec<i16> = bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect();

    Ok(pcm16_to_f32(&pcm))
}

/// Duration in milliseconds of a mono buffer at the given rate
pub fn duration_ms(sample_count: usize, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    (sample_count as u64 * 1000) / u64::from(sample_rate)
}

/// Bring a device frame to mono at the target rate
///
/// One-shot conversion for a standalone buffer. Streams that arrive in
/// pieces should keep a [`Resampler`] so interpolation carries across frames.
pub fn normalize_frame(frame: AudioFrame, target_sample_rate: u32) -> AudioFrame {
    let mut processed = frame;

    if processed.channels > 1 {
        processed = downmix_to_mono(processed);
    }

    if processed.sample_rate != target_sample_rate {
        processed = AudioFrame {
            samples: resample(&processed.samples, processed.sample_rate, target_sample_rate),
            sample_rate: target_sample_rate,
            channels: 1,
            timestamp_ms: processed.timestamp_ms,
        };
    }

    processed
}

/// Resample a complete mono buffer with linear interpolation
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    let mut resampler = Resampler::new(from_rate, to_rate);
    let mut output = resampler.process(samples);
    output.extend(resampler.flush());
    output
}

/// Streaming linear-interpolation resampler for mono audio
///
/// Output sample `n` sits at input position `n * from / to`; positions are
/// computed in integers so long streams never drift. The last input sample
/// is carried over so interpolation spans frame boundaries.
#[derive(Debug, Clone)]
pub struct Resampler {
    from_rate: u64,
    to_rate: u64,
    consumed: u64,
    produced: u64,
    last: Option<f32>,
}

impl Resampler {
    pub fn new(from_rate: u32, to_rate: u32) -> Self {
        Self {
            from_rate: u64::from(from_rate.max(1)),
            to_rate: u64::from(to_rate.max(1)),
            consumed: 0,
            produced: 0,
            last: None,
        }
    }

    pub fn from_rate(&self) -> u32 {
        self.from_rate as u32
    }

    pub fn to_rate(&self) -> u32 {
        self.to_rate as u32
    }

    pub fn is_passthrough(&self) -> bool {
        self.from_rate == self.to_rate
    }

    /// Resample the next piece of the stream
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        if self.is_passthrough() {
            return samples.to_vec();
        }
        if samples.is_empty() {
            return Vec::new();
        }

        let end = self.consumed + samples.len() as u64;
        let mut output = Vec::new();

        loop {
            let position = self.produced * self.from_rate;
            let index = position / self.to_rate;
            if index + 1 >= end {
                break;
            }

            let fraction = (position % self.to_rate) as f32 / self.to_rate as f32;
            let left = self.sample_at(index, samples);
            let right = self.sample_at(index + 1, samples);
            output.push(left + (right - left) * fraction);
            self.produced += 1;
        }

        self.consumed = end;
        self.last = samples.last().copied();
        output
    }

    /// Emit the outputs that fall on the final input sample
    pub fn flush(&mut self) -> Vec<f32> {
        let Some(last) = self.last else {
            return Vec::new();
        };
        if self.is_passthrough() {
            return Vec::new();
        }

        let mut output = Vec::new();
        while (self.produced * self.from_rate) / self.to_rate < self.consumed {
            output.push(last);
            self.produced += 1;
        }
        output
    }

    /// Global input sample `index`; the one before this piece comes from `last`
    fn sample_at(&self, index: u64, samples: &[f32]) -> f32 {
        if index < self.consumed {
            self.last.unwrap_or(0.0)
        } else {
            samples[(index - self.consumed) as usize]
        }
    }
}

/// Average interleaved channels into one
pub fn downmix_to_mono(frame: AudioFrame) -> AudioFrame {
    let channels = frame.channels.max(1) as usize;
    if channels == 1 {
        return frame;
    }

    let mono: Vec<f32> = frame
        .samples
        .chunks_exact(channels)
        .map(|chunk| chunk.iter().sum::<f32>() / channels as f32)
        .collect();

    AudioFrame {
        samples: mono,
        sample_rate: frame.sample_rate,
        channels: 1,
        timestamp_ms: frame.timestamp_ms,
    }
}

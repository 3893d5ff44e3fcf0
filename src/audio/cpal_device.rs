// Native microphone and speaker devices via cpal
//
// cpal streams are not Send on every platform, so each stream lives on a
// dedicated thread that owns it until told to stop.

use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Instant;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, SupportedStreamConfig};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::backend::{AudioDeviceConfig, AudioFrame, CaptureDevice, PlaybackCompletion, PlaybackDevice};
use crate::codec;
use crate::error::{Error, Result};

fn map_build_error(err: cpal::BuildStreamError) -> Error {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => {
            Error::DeviceUnavailable("audio device disappeared".to_string())
        }
        other => {
            let message = other.to_string();
            if message.to_lowercase().contains("permission") {
                Error::PermissionDenied(message)
            } else {
                Error::DeviceUnavailable(message)
            }
        }
    }
}

fn is_supported_format(format: SampleFormat) -> bool {
    matches!(format, SampleFormat::F32 | SampleFormat::I16)
}

fn unsupported_format(format: SampleFormat) -> Error {
    Error::DeviceUnavailable(format!("unsupported sample format {:?}", format))
}

/// Pick a stream config: the session rate when the device offers it in a
/// usable format, otherwise the device default. Rate conversion happens
/// downstream of capture and before rendering.
fn choose_config<I>(
    supported: I,
    default: std::result::Result<SupportedStreamConfig, cpal::DefaultStreamConfigError>,
    sample_rate: u32,
) -> Result<SupportedStreamConfig>
where
    I: Iterator<Item = cpal::SupportedStreamConfigRange>,
{
    let rate = SampleRate(sample_rate);
    let exact = supported
        .filter(|c| is_supported_format(c.sample_format()))
        .filter(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate)
        .min_by_key(|c| c.channels());
    if let Some(range) = exact {
        return Ok(range.with_sample_rate(rate));
    }

    let fallback = default.map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    if !is_supported_format(fallback.sample_format()) {
        return Err(unsupported_format(fallback.sample_format()));
    }
    Ok(fallback)
}

fn input_config(device: &cpal::Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    choose_config(supported, device.default_input_config(), sample_rate)
}

fn output_config(device: &cpal::Device, sample_rate: u32) -> Result<SupportedStreamConfig> {
    let supported = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceUnavailable(e.to_string()))?;
    choose_config(supported, device.default_output_config(), sample_rate)
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frame_tx: mpsc::Sender<AudioFrame>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let rate = config.sample_rate.0;
    let channels = config.channels;
    let started = Instant::now();

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            let frame = AudioFrame {
                samples: data.iter().map(|&s| f32::from_sample(s)).collect(),
                sample_rate: rate,
                channels,
                timestamp_ms: started.elapsed().as_millis() as u64,
            };
            // Drop frames rather than block the audio thread
            let _ = frame_tx.try_send(frame);
        },
        |err| {
            error!(error = %err, "audio capture error");
        },
        None,
    )
}

/// Microphone capture on the default input device
pub struct CpalCapture {
    config: AudioDeviceConfig,
    device_name: String,
    stop_tx: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl CpalCapture {
    pub fn open(config: AudioDeviceConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::DeviceUnavailable("no input device available".to_string()))?;

        let device_name = device.name().unwrap_or_else(|_| "default input".to_string());
        info!("Microphone selected: {}", device_name);

        Ok(Self {
            config,
            device_name,
            stop_tx: None,
            thread: None,
        })
    }
}

#[async_trait::async_trait]
impl CaptureDevice for CpalCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.thread.is_some() {
            return Err(Error::DeviceUnavailable("already capturing".to_string()));
        }

        let (frame_tx, frame_rx) = mpsc::channel(128);
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = oneshot::channel::<Result<()>>();
        let sample_rate = self.config.sample_rate;

        let thread = std::thread::spawn(move || {
            let host = cpal::default_host();
            let Some(device) = host.default_input_device() else {
                let _ = ready_tx.send(Err(Error::DeviceUnavailable("no input device".to_string())));
                return;
            };

            let supported = match input_config(&device, sample_rate) {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let format = supported.sample_format();
            let stream_config = supported.config();
            if stream_config.sample_rate.0 != sample_rate {
                info!(
                    "Microphone runs at {}Hz, resampling to {}Hz",
                    stream_config.sample_rate.0, sample_rate
                );
            }

            let stream = match format {
                SampleFormat::F32 => build_input::<f32>(&device, &stream_config, frame_tx),
                SampleFormat::I16 => build_input::<i16>(&device, &stream_config, frame_tx),
                other => {
                    let _ = ready_tx.send(Err(unsupported_format(other)));
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_build_error(e)));
                    return;
                }
            };

            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(Error::DeviceUnavailable(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
            debug!("microphone stream closed");
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(Error::DeviceUnavailable("capture thread exited".to_string()));
            }
        }

        self.stop_tx = Some(stop_tx);
        self.thread = Some(thread);

        info!("Microphone capture started");
        Ok(frame_rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = tokio::task::spawn_blocking(move || thread.join()).await;
            info!("Microphone capture stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.thread.is_some()
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

#[derive(Default)]
struct Renderer {
    buffer: Vec<f32>,
    position: usize,
    completion: Option<oneshot::Sender<Result<()>>>,
}

impl Renderer {
    fn next_sample(&mut self) -> f32 {
        match self.buffer.get(self.position) {
            Some(&sample) => {
                self.position += 1;
                sample
            }
            None => 0.0,
        }
    }

    fn signal_if_drained(&mut self) {
        if self.position >= self.buffer.len() {
            if let Some(done) = self.completion.take() {
                let _ = done.send(Ok(()));
            }
        }
    }
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    renderer: Arc<Mutex<Renderer>>,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let error_state = Arc::clone(&renderer);

    device.build_output_stream(
        config,
        move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
            let Ok(mut r) = renderer.lock() else {
                data.fill(T::from_sample(0.0f32));
                return;
            };
            for frame in data.chunks_mut(channels) {
                frame.fill(T::from_sample(r.next_sample()));
            }
            r.signal_if_drained();
        },
        move |err| {
            warn!(error = %err, "audio playback error");
            if let Ok(mut r) = error_state.lock() {
                if let Some(done) = r.completion.take() {
                    let _ = done.send(Err(Error::Playback(err.to_string())));
                }
            }
        },
        None,
    )
}

/// Speaker playback on the default output device
///
/// Chunks arrive at the session rate and are resampled to whatever rate the
/// device runs at.
pub struct CpalPlayback {
    device_name: String,
    session_rate: u32,
    device_rate: u32,
    renderer: Arc<Mutex<Renderer>>,
    stop_tx: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CpalPlayback {
    pub fn open(config: AudioDeviceConfig) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::DeviceUnavailable("no output device available".to_string()))?;
        let device_name = device.name().unwrap_or_else(|_| "default output".to_string());

        let supported = output_config(&device, config.sample_rate)?;
        let format = supported.sample_format();
        let stream_config = supported.config();
        let device_rate = stream_config.sample_rate.0;
        if device_rate != config.sample_rate {
            info!(
                "Speaker runs at {}Hz, resampling from {}Hz",
                device_rate, config.sample_rate
            );
        }

        let renderer = Arc::new(Mutex::new(Renderer::default()));
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let shared = Arc::clone(&renderer);

        std::thread::spawn(move || {
            let stream = match format {
                SampleFormat::F32 => build_output::<f32>(&device, &stream_config, shared),
                SampleFormat::I16 => build_output::<i16>(&device, &stream_config, shared),
                other => {
                    let _ = ready_tx.send(Err(unsupported_format(other)));
                    return;
                }
            };

            let stream = match stream {
                Ok(s) => s,
                Err(e) => {
                    let _ = ready_tx.send(Err(map_build_error(e)));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(Error::DeviceUnavailable(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
            debug!("speaker stream closed");
        });

        ready_rx
            .recv()
            .map_err(|_| Error::DeviceUnavailable("playback thread exited".to_string()))??;

        info!("Speaker selected: {}", device_name);

        Ok(Self {
            device_name,
            session_rate: config.sample_rate,
            device_rate,
            renderer,
            stop_tx: Mutex::new(Some(stop_tx)),
        })
    }
}

impl PlaybackDevice for CpalPlayback {
    fn schedule(&self, samples: Vec<f32>) -> Result<PlaybackCompletion> {
        let (tx, rx) = oneshot::channel();
        let mut r = self
            .renderer
            .lock()
            .map_err(|_| Error::Playback("renderer poisoned".to_string()))?;
        r.buffer = if self.device_rate == self.session_rate {
            samples
        } else {
            codec::resample(&samples, self.session_rate, self.device_rate)
        };
        r.position = 0;
        r.completion = Some(tx);
        Ok(rx)
    }

    fn stop(&self) {
        if let Ok(mut r) = self.renderer.lock() {
            r.buffer.clear();
            r.position = 0;
            r.completion = None;
        }
    }

    fn release(&self) {
        self.stop();
        if let Ok(mut stop_tx) = self.stop_tx.lock() {
            if let Some(tx) = stop_tx.take() {
                let _ = tx.send(());
            }
        }
    }

    fn name(&self) -> &str {
        &self.device_name
    }
}

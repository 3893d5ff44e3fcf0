// Synthetic audio devices
//
// In-memory capture and playback with real-time pacing on the tokio clock.
// Used for headless runs (`silence` input, `null` output) and by the
// integration tests, which run them under paused time.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tracing::debug;

use super::backend::{
    AudioDeviceConfig, AudioDevices, AudioFrame, CaptureDevice, PlaybackCompletion,
    PlaybackDevice,
};
use crate::codec;
use crate::error::{Error, Result};

/// Acquire/release counters for synthetic devices
#[derive(Debug, Default)]
pub struct DeviceLedger {
    pub captures_acquired: AtomicUsize,
    pub captures_released: AtomicUsize,
    pub playbacks_acquired: AtomicUsize,
    pub playbacks_released: AtomicUsize,
}

impl DeviceLedger {
    /// Devices acquired but not yet released
    pub fn open_handles(&self) -> usize {
        let acquired = self.captures_acquired.load(Ordering::SeqCst)
            + self.playbacks_acquired.load(Ordering::SeqCst);
        let released = self.captures_released.load(Ordering::SeqCst)
            + self.playbacks_released.load(Ordering::SeqCst);
        acquired.saturating_sub(released)
    }
}

/// Capture device producing silence or a fixed sample buffer
pub struct SyntheticCapture {
    config: AudioDeviceConfig,
    /// `None` produces endless silence
    samples: Option<Vec<f32>>,
    task: Option<JoinHandle<()>>,
    capturing: bool,
    released: bool,
    ledger: Option<Arc<DeviceLedger>>,
}

impl SyntheticCapture {
    /// Endless silence at the configured rate
    pub fn silence(config: AudioDeviceConfig) -> Self {
        Self {
            config,
            samples: None,
            task: None,
            capturing: false,
            released: false,
            ledger: None,
        }
    }

    /// Emit the given mono samples once, then end the stream
    pub fn from_samples(samples: Vec<f32>, config: AudioDeviceConfig) -> Self {
        Self {
            samples: Some(samples),
            ..Self::silence(config)
        }
    }

    fn with_ledger(mut self, ledger: Arc<DeviceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    fn samples_per_buffer(&self) -> usize {
        let n = self.config.sample_rate as u64 * self.config.buffer_duration_ms / 1000;
        n.max(1) as usize
    }
}

#[async_trait::async_trait]
impl CaptureDevice for SyntheticCapture {
    async fn start(&mut self) -> Result<mpsc::Receiver<AudioFrame>> {
        if self.capturing {
            return Err(Error::DeviceUnavailable("already capturing".to_string()));
        }
        if self.released {
            return Err(Error::DeviceUnavailable("device released".to_string()));
        }

        let (tx, rx) = mpsc::channel(64);
        let buffer_len = self.samples_per_buffer();
        let sample_rate = self.config.sample_rate;
        let cadence = Duration::from_millis(self.config.buffer_duration_ms.max(1));
        let samples = self.samples.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            let mut timestamp_ms = 0u64;

            let mut emit = |chunk: Vec<f32>| {
                let frame = AudioFrame {
                    samples: chunk,
                    sample_rate,
                    channels: 1,
                    timestamp_ms,
                };
                timestamp_ms += cadence.as_millis() as u64;
                frame
            };

            match samples {
                Some(samples) => {
                    for chunk in samples.chunks(buffer_len) {
                        ticker.tick().await;
                        if tx.send(emit(chunk.to_vec())).await.is_err() {
                            return;
                        }
                    }
                }
                None => loop {
                    ticker.tick().await;
                    if tx.send(emit(vec![0.0; buffer_len])).await.is_err() {
                        return;
                    }
                },
            }
        });

        self.task = Some(task);
        self.capturing = true;

        debug!("synthetic capture started ({}Hz)", sample_rate);

        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.capturing = false;

        if !self.released {
            self.released = true;
            if let Some(ledger) = &self.ledger {
                ledger.captures_released.fetch_add(1, Ordering::SeqCst);
            }
        }

        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.capturing
    }

    fn name(&self) -> &str {
        "synthetic capture"
    }
}

/// One buffer handed to a synthetic playback device
#[derive(Debug, Clone)]
pub struct RenderRecord {
    /// Number of samples in the buffer
    pub samples: usize,
    /// First sample, handy for tagging buffers in tests
    pub first_sample: f32,
    /// When rendering began
    pub started_at: Instant,
}

struct ActiveRender {
    rendering: Arc<AtomicBool>,
    timer: JoinHandle<()>,
}

/// Playback device that renders nowhere but takes real time to do so
pub struct SyntheticPlayback {
    sample_rate: u32,
    active: Mutex<Option<ActiveRender>>,
    log: Mutex<Vec<RenderRecord>>,
    interrupted: AtomicUsize,
    overlaps: AtomicUsize,
    fail_next: AtomicBool,
    released: AtomicBool,
    ledger: Option<Arc<DeviceLedger>>,
}

impl SyntheticPlayback {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            active: Mutex::new(None),
            log: Mutex::new(Vec::new()),
            interrupted: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
            released: AtomicBool::new(false),
            ledger: None,
        }
    }

    fn with_ledger(mut self, ledger: Arc<DeviceLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// Buffers rendered so far, in order
    pub fn rendered(&self) -> Vec<RenderRecord> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Number of buffers cut short by `stop`
    pub fn interrupted(&self) -> usize {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Number of times a buffer was scheduled while another was rendering
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    /// Whether a buffer is rendering right now
    pub fn is_rendering(&self) -> bool {
        self.active
            .lock()
            .ok()
            .and_then(|active| {
                active
                    .as_ref()
                    .map(|render| render.rendering.load(Ordering::SeqCst))
            })
            .unwrap_or(false)
    }

    /// Make the next scheduled buffer fail to render
    pub fn fail_next_render(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    fn cut_active(&self) -> bool {
        let Ok(mut active) = self.active.lock() else {
            return false;
        };
        match active.take() {
            Some(render) => {
                let was_rendering = render.rendering.swap(false, Ordering::SeqCst);
                render.timer.abort();
                was_rendering
            }
            None => false,
        }
    }
}

impl PlaybackDevice for SyntheticPlayback {
    fn schedule(&self, samples: Vec<f32>) -> Result<PlaybackCompletion> {
        if self.is_released() {
            return Err(Error::Playback("device released".to_string()));
        }

        if self.cut_active() {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let (tx, rx) = oneshot::channel();

        if self.fail_next.swap(false, Ordering::SeqCst) {
            let _ = tx.send(Err(Error::Playback("injected render failure".to_string())));
            return Ok(rx);
        }

        let duration = Duration::from_millis(codec::duration_ms(samples.len(), self.sample_rate));
        if let Ok(mut log) = self.log.lock() {
            log.push(RenderRecord {
                samples: samples.len(),
                first_sample: samples.first().copied().unwrap_or(0.0),
                started_at: Instant::now(),
            });
        }

        let rendering = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&rendering);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            flag.store(false, Ordering::SeqCst);
            let _ = tx.send(Ok(()));
        });

        if let Ok(mut active) = self.active.lock() {
            *active = Some(ActiveRender { rendering, timer });
        }

        Ok(rx)
    }

    fn stop(&self) {
        if self.cut_active() {
            self.interrupted.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn release(&self) {
        self.stop();
        if !self.released.swap(true, Ordering::SeqCst) {
            if let Some(ledger) = &self.ledger {
                ledger.playbacks_released.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn name(&self) -> &str {
        "synthetic playback"
    }
}

/// Device factory handing out synthetic devices and tracking their lifecycle
#[derive(Default)]
pub struct SyntheticDevices {
    capture_samples: Option<Vec<f32>>,
    deny_permission: bool,
    no_microphone: bool,
    ledger: Arc<DeviceLedger>,
    playbacks: Mutex<Vec<Arc<SyntheticPlayback>>>,
}

impl SyntheticDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture these samples once instead of endless silence
    pub fn with_capture_samples(mut self, samples: Vec<f32>) -> Self {
        self.capture_samples = Some(samples);
        self
    }

    /// Refuse microphone access
    pub fn deny_microphone(mut self) -> Self {
        self.deny_permission = true;
        self
    }

    /// Report that no microphone is present
    pub fn without_microphone(mut self) -> Self {
        self.no_microphone = true;
        self
    }

    pub fn ledger(&self) -> Arc<DeviceLedger> {
        Arc::clone(&self.ledger)
    }

    /// Most recently acquired playback device
    pub fn last_playback(&self) -> Option<Arc<SyntheticPlayback>> {
        self.playbacks.lock().ok().and_then(|p| p.last().cloned())
    }
}

#[async_trait::async_trait]
impl AudioDevices for SyntheticDevices {
    async fn acquire_capture(&self, config: &AudioDeviceConfig) -> Result<Box<dyn CaptureDevice>> {
        if self.deny_permission {
            return Err(Error::PermissionDenied("microphone access refused".to_string()));
        }
        if self.no_microphone {
            return Err(Error::DeviceUnavailable("no input device available".to_string()));
        }

        let device = match &self.capture_samples {
            Some(samples) => SyntheticCapture::from_samples(samples.clone(), config.clone()),
            None => SyntheticCapture::silence(config.clone()),
        };

        self.ledger.captures_acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(device.with_ledger(self.ledger())))
    }

    async fn acquire_playback(
        &self,
        config: &AudioDeviceConfig,
    ) -> Result<Arc<dyn PlaybackDevice>> {
        let device =
            Arc::new(SyntheticPlayback::new(config.sample_rate).with_ledger(self.ledger()));

        self.ledger.playbacks_acquired.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut playbacks) = self.playbacks.lock() {
            playbacks.push(Arc::clone(&device));
        }

        Ok(device)
    }
}

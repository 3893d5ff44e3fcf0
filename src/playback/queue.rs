use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::audio::PlaybackDevice;

/// Decoded assistant audio tagged with its conversation item
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub item_id: String,
    pub samples: Vec<f32>,
}

/// Result of a barge-in: how much of the item the user actually heard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Truncation {
    pub item_id: String,
    pub audio_end_ms: u64,
}

/// Counters kept for the session stats
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackStats {
    pub chunks_played: usize,
    pub chunks_discarded: usize,
    pub truncations: usize,
    pub render_failures: usize,
}

#[derive(Default)]
struct PlaybackState {
    current_item_id: Option<String>,
    play_started_at: Option<Instant>,
    /// Audio of the current item heard before a queue underrun
    heard_before_ms: u64,
    /// Item that ran dry mid-response, with how much of it was heard
    stalled: Option<(String, u64)>,
    pending: VecDeque<AudioChunk>,
    /// Bumped on every barge-in, abort and close; stale completions are ignored
    epoch: u64,
    rendering: bool,
    /// Items that must never be rendered again
    dropped_items: HashSet<String>,
    closed: bool,
    stats: PlaybackStats,
}

impl PlaybackState {
    /// Back to idle, discarding everything queued. Returns the number discarded.
    fn reset(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        self.current_item_id = None;
        self.play_started_at = None;
        self.heard_before_ms = 0;
        self.stalled = None;
        self.rendering = false;
        self.epoch += 1;
        self.stats.chunks_discarded += discarded;
        discarded
    }

    /// How much of the current item has been heard so far
    fn heard_ms(&self) -> u64 {
        let since_start = self
            .play_started_at
            .map(|started| started.elapsed().as_millis() as u64)
            .unwrap_or(0);
        self.heard_before_ms + since_start
    }

    /// Start or continue the item of the chunk about to render
    fn begin_chunk(&mut self, item_id: &str) {
        if self.current_item_id.as_deref() == Some(item_id) {
            return;
        }

        // A stalled item picks up its clock where it left off
        self.heard_before_ms = match self.stalled.take() {
            Some((stalled_id, heard)) if stalled_id == item_id => heard,
            _ => 0,
        };
        self.current_item_id = Some(item_id.to_string());
        self.play_started_at = Some(Instant::now());
    }
}

/// Gapless sequential playback with barge-in support
///
/// All state transitions go through one mutex, which is never held across
/// an await. Device scheduling happens under that lock so a barge-in can
/// never race a chunk onto the speaker.
pub struct PlaybackQueue {
    state: Mutex<PlaybackState>,
    wake: Notify,
    device: Arc<dyn PlaybackDevice>,
}

impl PlaybackQueue {
    pub fn new(device: Arc<dyn PlaybackDevice>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PlaybackState::default()),
            wake: Notify::new(),
            device,
        })
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackState> {
        // Poisoning is ignored; teardown must still get through.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Spawn the driver task consuming the queue
    pub fn spawn_driver(self: &Arc<Self>) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move { queue.drive().await })
    }

    /// Queue a chunk behind everything already pending.
    ///
    /// Returns false when the chunk was discarded: its item was truncated
    /// or aborted, or the queue is closed.
    pub fn enqueue(&self, chunk: AudioChunk) -> bool {
        {
            let mut state = self.lock();
            if state.closed || state.dropped_items.contains(&chunk.item_id) {
                state.stats.chunks_discarded += 1;
                return false;
            }
            state.pending.push_back(chunk);
        }
        self.wake.notify_one();
        true
    }

    /// Barge-in: hard-stop playback and report how much was heard.
    ///
    /// No-op returning `None` while idle.
    pub fn interrupt(&self) -> Option<Truncation> {
        let mut state = self.lock();
        let item_id = state.current_item_id.clone()?;

        let audio_end_ms = state.heard_ms();

        self.device.stop();
        let discarded = state.reset();
        state.dropped_items.insert(item_id.clone());
        state.stats.truncations += 1;

        info!(
            "Barge-in: truncated {} at {}ms ({} queued chunks discarded)",
            item_id, audio_end_ms, discarded
        );

        Some(Truncation {
            item_id,
            audio_end_ms,
        })
    }

    /// Stop local playback without truncating (assistant audio muted)
    pub fn silence(&self) -> usize {
        let mut state = self.lock();
        if state.current_item_id.is_none() && state.pending.is_empty() {
            return 0;
        }
        self.device.stop();
        state.reset()
    }

    /// Stop playback for good; later chunks are discarded. Safe to call repeatedly.
    pub fn close(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            self.device.stop();
            let discarded = state.reset();
            debug!("Playback queue closed ({} chunks discarded)", discarded);
        }
        self.wake.notify_one();
    }

    /// Item currently playing, `None` when idle
    pub fn current_item(&self) -> Option<String> {
        self.lock().current_item_id.clone()
    }

    pub fn is_idle(&self) -> bool {
        self.lock().current_item_id.is_none()
    }

    /// Whether a chunk is on the device right now
    pub fn is_rendering(&self) -> bool {
        self.lock().rendering
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Whether chunks of this item are being dropped
    pub fn is_dropped(&self, item_id: &str) -> bool {
        self.lock().dropped_items.contains(item_id)
    }

    pub fn stats(&self) -> PlaybackStats {
        self.lock().stats.clone()
    }

    async fn drive(&self) {
        debug!("Playback driver started on {}", self.device.name());

        loop {
            let scheduled = {
                let mut state = self.lock();
                if state.closed {
                    break;
                }

                match state.pending.pop_front() {
                    Some(chunk) => {
                        state.begin_chunk(&chunk.item_id);

                        let epoch = state.epoch;
                        let item_id = chunk.item_id;
                        match self.device.schedule(chunk.samples) {
                            Ok(completion) => {
                                state.rendering = true;
                                Some((completion, item_id, epoch))
                            }
                            Err(e) => {
                                warn!("Playback error on {}: {}", item_id, e);
                                Self::abort_item(&mut state, &item_id);
                                None
                            }
                        }
                    }
                    None => {
                        if let Some(item_id) = state.current_item_id.take() {
                            let heard = state.heard_ms();
                            debug!("Playback idle after {}ms of {}", heard, item_id);
                            state.stalled = Some((item_id, heard));
                        }
                        state.play_started_at = None;
                        state.heard_before_ms = 0;
                        None
                    }
                }
            };

            let Some((completion, item_id, epoch)) = scheduled else {
                let drained = self.lock().pending.is_empty();
                if drained {
                    self.wake.notified().await;
                }
                continue;
            };

            let outcome = completion.await;

            let mut state = self.lock();
            if state.epoch != epoch {
                // Interrupted, silenced or closed while rendering
                continue;
            }
            state.rendering = false;

            match outcome {
                Ok(Ok(())) => state.stats.chunks_played += 1,
                Ok(Err(e)) => {
                    warn!("Playback error on {}: {}", item_id, e);
                    Self::abort_item(&mut state, &item_id);
                }
                Err(_) => {
                    warn!("Playback of {} stopped by the device", item_id);
                    Self::abort_item(&mut state, &item_id);
                }
            }
        }

        debug!("Playback driver stopped");
    }

    /// Render failure: drop the item and go idle
    fn abort_item(state: &mut PlaybackState, item_id: &str) {
        state.stats.render_failures += 1;
        state.dropped_items.insert(item_id.to_string());

        let before = state.pending.len();
        state.pending.retain(|chunk| chunk.item_id != item_id);
        state.stats.chunks_discarded += before - state.pending.len();

        state.current_item_id = None;
        state.play_started_at = None;
        state.heard_before_ms = 0;
        state.stalled = None;
        state.rendering = false;
        state.epoch += 1;
    }
}

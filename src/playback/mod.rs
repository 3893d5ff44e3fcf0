//! Playback queue and interruption controller
//!
//! Assistant audio chunks are rendered strictly in arrival order by a single
//! driver task. A barge-in stops the device, drops everything queued for the
//! interrupted item and reports how much of it was heard so the backend can
//! truncate its own record.

mod queue;

pub use queue::{AudioChunk, PlaybackQueue, PlaybackStats, Truncation};

//! Voice session orchestration
//!
//! This module provides the `VoiceSession` abstraction that manages:
//! - Microphone capture streamed to the realtime backend
//! - Assistant audio playback with barge-in
//! - Transcript assembly for both speakers
//! - Session lifecycle, status and statistics

mod capture;
mod config;
mod items;
#[allow(clippy::module_inception)]
mod session;
mod stats;

pub use capture::CapturePipeline;
pub use config::{SessionConfig, VadConfig};
pub use items::{ConversationItem, ConversationItems};
pub use session::VoiceSession;
pub use stats::{Preferences, SessionStats, SessionStatus};

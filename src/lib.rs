pub mod audio;
pub mod codec;
pub mod config;
pub mod credential;
pub mod error;
pub mod http;
pub mod playback;
pub mod session;
pub mod signaling;
pub mod transcript;

pub use audio::{
    AudioBackendFactory, AudioDeviceConfig, AudioDevices, AudioFile, AudioFrame, AudioSink,
    AudioSource, CaptureDevice, PlaybackDevice, SyntheticDevices,
};
pub use config::Config;
pub use credential::{Credential, CredentialProvider, StaticCredentialProvider};
pub use error::{Error, Result};
pub use http::{create_router, AppState};
pub use playback::{AudioChunk, PlaybackQueue, PlaybackStats, Truncation};
pub use session::{Preferences, SessionConfig, SessionStats, SessionStatus, VoiceSession};
pub use signaling::{
    ClientEvent, MemoryTransport, RemotePeer, Role, ServerEvent, SignalingChannel, Transport,
    WebSocketTransport,
};
pub use transcript::{TranscriptAssembler, TranscriptEntry};

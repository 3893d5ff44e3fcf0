pub mod backend;
pub mod file;
pub mod synthetic;

#[cfg(feature = "cpal-audio")]
pub mod cpal_device;

pub use backend::{
    AudioBackendFactory, AudioDeviceConfig, AudioDevices, AudioFrame, AudioSink, AudioSource,
    CaptureDevice, PlaybackCompletion, PlaybackDevice,
};
pub use file::{AudioFile, FileCapture};
pub use synthetic::{DeviceLedger, RenderRecord, SyntheticCapture, SyntheticDevices, SyntheticPlayback};

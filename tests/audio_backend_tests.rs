// Integration tests for audio device abstractions
//
// These tests verify the device factory and the synthetic devices the
// session tests rely on.

use loqa_realtime::audio::{
    AudioBackendFactory, AudioDeviceConfig, AudioDevices, AudioSink, AudioSource,
    PlaybackDevice, SyntheticDevices, SyntheticPlayback,
};
use loqa_realtime::error::Error;
use std::time::Duration;

#[test]
fn test_audio_device_config_default() {
    let config = AudioDeviceConfig::default();

    assert_eq!(config.sample_rate, 24000, "Default should be the 24kHz wire rate");
    assert_eq!(config.channels, 1, "Default should be mono");
    assert_eq!(config.buffer_duration_ms, 20, "Default buffer should be 20ms");
}

#[tokio::test(start_paused = true)]
async fn test_factory_silence_and_null() {
    let factory = AudioBackendFactory::new(AudioSource::Silence, AudioSink::Null);
    let config = AudioDeviceConfig::default();

    let mut capture = factory.acquire_capture(&config).await.unwrap();
    let mut frames = capture.start().await.unwrap();

    let frame = frames.recv().await.unwrap();
    assert_eq!(frame.sample_rate, 24000);
    assert_eq!(frame.samples.len(), 480);
    assert!(frame.samples.iter().all(|s| *s == 0.0));

    capture.stop().await.unwrap();
    assert!(!capture.is_capturing());

    let playback = factory.acquire_playback(&config).await.unwrap();
    let done = playback.schedule(vec![0.0; 2400]).unwrap();
    assert!(done.await.unwrap().is_ok());
    playback.release();
}

#[cfg(not(feature = "cpal-audio"))]
#[tokio::test]
async fn test_factory_native_devices_need_feature() {
    let factory = AudioBackendFactory::new(AudioSource::Microphone, AudioSink::Speaker);
    let config = AudioDeviceConfig::default();

    assert!(matches!(
        factory.acquire_capture(&config).await,
        Err(Error::DeviceUnavailable(_))
    ));
    assert!(matches!(
        factory.acquire_playback(&config).await,
        Err(Error::DeviceUnavailable(_))
    ));
}

#[tokio::test]
async fn test_factory_missing_wav_is_device_unavailable() {
    let factory = AudioBackendFactory::new(
        AudioSource::File("/nonexistent/input.wav".to_string()),
        AudioSink::Null,
    );

    assert!(matches!(
        factory.acquire_capture(&AudioDeviceConfig::default()).await,
        Err(Error::DeviceUnavailable(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_synthetic_playback_takes_real_time() {
    let device = SyntheticPlayback::new(24000);

    let start = tokio::time::Instant::now();
    let done = device.schedule(vec![0.25; 4800]).unwrap();
    assert!(device.is_rendering());

    done.await.unwrap().unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(200));
    assert!(!device.is_rendering());
    assert_eq!(device.rendered()[0].samples, 4800);
}

#[tokio::test(start_paused = true)]
async fn test_synthetic_playback_stop_cuts_render() {
    let device = SyntheticPlayback::new(24000);

    let done = device.schedule(vec![0.0; 4800]).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    device.stop();

    // Completion channel closes without a result
    assert!(done.await.is_err());
    assert_eq!(device.interrupted(), 1);

    device.release();
    device.release();
    assert!(device.is_released());
    assert!(matches!(
        device.schedule(vec![0.0; 10]),
        Err(Error::Playback(_))
    ));
}

#[tokio::test]
async fn test_device_ledger_tracks_handles() {
    let devices = SyntheticDevices::new();
    let ledger = devices.ledger();
    let config = AudioDeviceConfig::default();

    let mut capture = devices.acquire_capture(&config).await.unwrap();
    let playback = devices.acquire_playback(&config).await.unwrap();
    assert_eq!(ledger.open_handles(), 2);

    capture.stop().await.unwrap();
    capture.stop().await.unwrap();
    playback.release();
    assert_eq!(ledger.open_handles(), 0);
}

#[tokio::test]
async fn test_denied_microphone() {
    let devices = SyntheticDevices::new().deny_microphone();

    let result = devices.acquire_capture(&AudioDeviceConfig::default()).await;
    assert!(matches!(result, Err(Error::PermissionDenied(_))));
    assert_eq!(devices.ledger().open_handles(), 0);
}

// Integration tests for the playback queue and barge-in controller
//
// These run under paused tokio time so render durations and truncation
// offsets are exact.

use loqa_realtime::audio::SyntheticPlayback;
use loqa_realtime::playback::{AudioChunk, PlaybackQueue, Truncation};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

const RATE: u32 = 24000;

/// 200ms of audio whose first sample tags the chunk
fn chunk(item_id: &str, tag: f32) -> AudioChunk {
    AudioChunk {
        item_id: item_id.to_string(),
        samples: vec![tag; 4800],
    }
}

fn setup() -> (Arc<PlaybackQueue>, Arc<SyntheticPlayback>) {
    let device = Arc::new(SyntheticPlayback::new(RATE));
    let queue = PlaybackQueue::new(device.clone());
    queue.spawn_driver();
    (queue, device)
}

#[tokio::test(start_paused = true)]
async fn test_chunks_render_in_order_without_gaps() {
    let (queue, device) = setup();

    assert!(queue.enqueue(chunk("r1", 0.1)));
    assert!(queue.enqueue(chunk("r1", 0.2)));
    assert!(queue.enqueue(chunk("r1", 0.3)));

    sleep(Duration::from_millis(1000)).await;

    let rendered = device.rendered();
    let tags: Vec<f32> = rendered.iter().map(|r| r.first_sample).collect();
    assert_eq!(tags, vec![0.1, 0.2, 0.3]);
    assert_eq!(device.overlaps(), 0, "chunks must never render concurrently");

    // Each chunk starts exactly when the previous one finished
    for pair in rendered.windows(2) {
        assert_eq!(
            pair[1].started_at - pair[0].started_at,
            Duration::from_millis(200)
        );
    }

    assert!(queue.is_idle());
    assert_eq!(queue.stats().chunks_played, 3);
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_reports_played_duration() {
    let (queue, device) = setup();

    queue.enqueue(chunk("r1", 0.1));
    queue.enqueue(chunk("r1", 0.2));
    queue.enqueue(chunk("r1", 0.3));

    sleep(Duration::from_millis(250)).await;
    assert_eq!(queue.current_item().as_deref(), Some("r1"));

    let truncation = queue.interrupt();
    assert_eq!(
        truncation,
        Some(Truncation {
            item_id: "r1".to_string(),
            audio_end_ms: 250,
        })
    );

    assert!(queue.is_idle());
    assert_eq!(queue.pending_len(), 0);
    assert!(!device.is_rendering());

    sleep(Duration::from_millis(1000)).await;

    // Chunk 3 never reached the device
    assert_eq!(device.rendered().len(), 2);
    assert_eq!(device.interrupted(), 1);

    let stats = queue.stats();
    assert_eq!(stats.chunks_played, 1);
    assert_eq!(stats.chunks_discarded, 1);
    assert_eq!(stats.truncations, 1);
}

#[tokio::test(start_paused = true)]
async fn test_underrun_keeps_item_clock() {
    let (queue, _device) = setup();

    // The queue runs dry between two deltas of the same item
    queue.enqueue(chunk("r1", 0.1));
    sleep(Duration::from_millis(300)).await;
    assert!(queue.is_idle());

    queue.enqueue(chunk("r1", 0.2));
    sleep(Duration::from_millis(50)).await;

    let truncation = queue.interrupt().expect("r1 is playing");
    assert_eq!(truncation.audio_end_ms, 250);
}

#[tokio::test(start_paused = true)]
async fn test_new_item_after_underrun_starts_fresh_clock() {
    let (queue, _device) = setup();

    queue.enqueue(chunk("r1", 0.1));
    sleep(Duration::from_millis(300)).await;

    queue.enqueue(chunk("r2", 0.2));
    sleep(Duration::from_millis(50)).await;

    assert_eq!(
        queue.interrupt(),
        Some(Truncation {
            item_id: "r2".to_string(),
            audio_end_ms: 50,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_interrupt_while_idle_is_noop() {
    let (queue, device) = setup();

    assert_eq!(queue.interrupt(), None);
    assert_eq!(queue.stats().truncations, 0);
    assert_eq!(device.interrupted(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_truncated_item_never_plays_again() {
    let (queue, device) = setup();

    queue.enqueue(chunk("r1", 0.1));
    sleep(Duration::from_millis(50)).await;
    queue.interrupt();

    // A late delta for the truncated item is dropped; the next response plays
    assert!(!queue.enqueue(chunk("r1", 0.2)));
    assert!(queue.is_dropped("r1"));
    assert!(queue.enqueue(chunk("r2", 0.5)));

    sleep(Duration::from_millis(500)).await;

    let tags: Vec<f32> = device.rendered().iter().map(|r| r.first_sample).collect();
    assert_eq!(tags, vec![0.1, 0.5]);
}

#[tokio::test(start_paused = true)]
async fn test_render_failure_aborts_item() {
    let (queue, device) = setup();
    device.fail_next_render();

    queue.enqueue(chunk("r1", 0.1));
    queue.enqueue(chunk("r1", 0.2));
    sleep(Duration::from_millis(10)).await;

    assert!(queue.is_idle());
    assert!(queue.is_dropped("r1"));

    // The session goes on with the next item
    queue.enqueue(chunk("r2", 0.7));
    sleep(Duration::from_millis(500)).await;

    let stats = queue.stats();
    assert_eq!(stats.render_failures, 1);
    assert_eq!(stats.chunks_played, 1);
    let tags: Vec<f32> = device.rendered().iter().map(|r| r.first_sample).collect();
    assert_eq!(tags, vec![0.7]);
}

#[tokio::test(start_paused = true)]
async fn test_silence_stops_without_truncation() {
    let (queue, device) = setup();

    queue.enqueue(chunk("r1", 0.1));
    queue.enqueue(chunk("r1", 0.2));
    sleep(Duration::from_millis(100)).await;

    assert_eq!(queue.silence(), 1);
    assert!(queue.is_idle());
    assert_eq!(queue.stats().truncations, 0);
    assert_eq!(device.interrupted(), 1);

    // Silencing does not blacklist the item
    assert!(!queue.is_dropped("r1"));
}

#[tokio::test(start_paused = true)]
async fn test_close_is_idempotent_and_final() {
    let (queue, device) = setup();

    queue.enqueue(chunk("r1", 0.1));
    queue.enqueue(chunk("r1", 0.2));
    sleep(Duration::from_millis(50)).await;

    queue.close();
    queue.close();

    assert!(!queue.enqueue(chunk("r2", 0.3)));
    sleep(Duration::from_millis(500)).await;

    assert_eq!(device.rendered().len(), 1);
    assert!(!device.is_rendering());
}

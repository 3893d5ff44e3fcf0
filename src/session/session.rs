use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::capture::CapturePipeline;
use super::config::SessionConfig;
use super::items::ConversationItems;
use super::stats::{Preferences, SessionStats, SessionStatus};
use crate::audio::{AudioDevices, PlaybackDevice};
use crate::codec;
use crate::credential::CredentialProvider;
use crate::error::{Error, Result};
use crate::playback::{AudioChunk, PlaybackQueue};
use crate::signaling::{
    ClientEvent, Role, ServerEvent, SignalingChannel, SignalingSender, Transport,
};
use crate::transcript::{TranscriptAssembler, TranscriptEntry};

/// How long teardown waits for a session task before aborting it
const TASK_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A realtime duplex voice session with an AI backend
///
/// Owns at most one live session at a time. Everything per-session lives in
/// a `LiveSession` that is torn down as a unit on disconnect or fatal error.
pub struct VoiceSession {
    config: SessionConfig,
    devices: Arc<dyn AudioDevices>,
    transport: Arc<dyn Transport>,
    credentials: Arc<dyn CredentialProvider>,
    shared: Arc<Shared>,
}

/// State outliving individual sessions
struct Shared {
    /// Serializes connect, disconnect and fatal teardown
    live: tokio::sync::Mutex<Option<LiveSession>>,

    /// Read-side view of the live session
    current: RwLock<Option<Arc<SessionContext>>>,

    status: watch::Sender<SessionStatus>,

    preferences: Mutex<Preferences>,

    last_error: Mutex<Option<String>>,

    /// Final stats of the last session that ended
    last_stats: Mutex<Option<SessionStats>>,
}

/// Per-session state shared by the dispatcher and the public API
struct SessionContext {
    session_id: String,
    started_at: DateTime<Utc>,
    sender: SignalingSender,
    playback: Arc<PlaybackQueue>,
    transcript: Mutex<TranscriptAssembler>,
    items: Mutex<ConversationItems>,
    user_speaking: AtomicBool,
    frames_sent: Arc<AtomicU64>,
    protocol_errors: AtomicU64,
    last_error: Mutex<Option<String>>,
    shared: Weak<Shared>,
}

/// Resources held by a connected session
struct LiveSession {
    context: Arc<SessionContext>,
    capture: CapturePipeline,
    playback_device: Arc<dyn PlaybackDevice>,
    tasks: SessionTasks,
}

struct SessionTasks {
    shutdown: watch::Sender<bool>,
    driver: JoinHandle<()>,
    dispatcher: JoinHandle<()>,
    watchdog: JoinHandle<()>,
}

impl VoiceSession {
    pub fn new(
        config: SessionConfig,
        devices: Arc<dyn AudioDevices>,
        transport: Arc<dyn Transport>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Disconnected);

        Self {
            config,
            devices,
            transport,
            credentials,
            shared: Arc::new(Shared {
                live: tokio::sync::Mutex::new(None),
                current: RwLock::new(None),
                status,
                preferences: Mutex::new(Preferences::default()),
                last_error: Mutex::new(None),
                last_stats: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session: acquire devices, handshake, start streaming
    ///
    /// Connecting while a session is live is a no-op. On failure every
    /// resource acquired so far is released and the status moves to `Error`.
    pub async fn connect(&self) -> Result<()> {
        let mut live = self.shared.live.lock().await;
        if live.is_some() {
            info!("Session already connected");
            return Ok(());
        }

        self.shared.status.send_replace(SessionStatus::Connecting);

        let session = match self.open().await {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to connect: {}", e);
                *lock(&self.shared.last_error) = Some(e.to_string());
                self.shared.status.send_replace(SessionStatus::Error);
                return Err(e);
            }
        };

        let context = Arc::clone(&session.context);
        *self.shared.write_current() = Some(Arc::clone(&context));
        *live = Some(session);
        *lock(&self.shared.last_error) = None;
        self.shared.status.send_replace(SessionStatus::Connected);
        drop(live);

        info!("Voice session {} connected", context.session_id);

        if let Some(greeting) = &self.config.greeting {
            // Seed turn so the assistant speaks first; not shown in the transcript
            if let Err(e) = send_turn(&context.sender, greeting).await {
                warn!("Failed to send greeting: {}", e);
            }
        }

        Ok(())
    }

    async fn open(&self) -> Result<LiveSession> {
        let session_id = Uuid::new_v4().to_string();
        let device_config = self.config.device_config();

        // Microphone first: a refusal must happen before anything else is held
        let capture_device = self.devices.acquire_capture(&device_config).await?;
        let mut capture = CapturePipeline::new(capture_device);

        let playback_device = match self.devices.acquire_playback(&device_config).await {
            Ok(device) => device,
            Err(e) => {
                capture.stop().await;
                return Err(e);
            }
        };

        match self
            .establish(session_id, &mut capture, &playback_device)
            .await
        {
            Ok((context, tasks)) => Ok(LiveSession {
                context,
                capture,
                playback_device,
                tasks,
            }),
            Err(e) => {
                capture.stop().await;
                playback_device.release();
                Err(e)
            }
        }
    }

    async fn establish(
        &self,
        session_id: String,
        capture: &mut CapturePipeline,
        playback_device: &Arc<dyn PlaybackDevice>,
    ) -> Result<(Arc<SessionContext>, SessionTasks)> {
        let credential = self.credentials.issue_realtime_credential().await?;
        if credential.is_expired() {
            return Err(Error::AuthExpired);
        }

        info!(
            "Opening realtime session {} over {}",
            session_id,
            self.transport.name()
        );

        let mut channel = SignalingChannel::connect(
            self.transport.as_ref(),
            &credential,
            self.config.session_update(),
            self.config.handshake_timeout,
        )
        .await?;

        let playback = PlaybackQueue::new(Arc::clone(playback_device));
        let driver = playback.spawn_driver();

        if let Err(e) = capture
            .start(
                channel.sender(),
                self.config.sample_rate,
                self.config.frame_samples,
            )
            .await
        {
            playback.close();
            driver.abort();
            channel.close().await;
            return Err(e);
        }

        let context = Arc::new(SessionContext {
            session_id,
            started_at: Utc::now(),
            sender: channel.sender(),
            playback,
            transcript: Mutex::new(TranscriptAssembler::new()),
            items: Mutex::new(ConversationItems::default()),
            user_speaking: AtomicBool::new(false),
            frames_sent: capture.frames_counter(),
            protocol_errors: AtomicU64::new(0),
            last_error: Mutex::new(None),
            shared: Arc::downgrade(&self.shared),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);

        let dispatcher = tokio::spawn(dispatch(
            Arc::clone(&context),
            channel,
            shutdown_rx.clone(),
        ));

        let expires_in = credential.remaining().unwrap_or_default();
        let watchdog = tokio::spawn(watch_credential(
            Arc::clone(&context),
            expires_in,
            shutdown_rx,
        ));

        let tasks = SessionTasks {
            shutdown,
            driver,
            dispatcher,
            watchdog,
        };
        Ok((context, tasks))
    }

    /// Tear the session down and return its final stats
    ///
    /// Idempotent: returns `None` when nothing is live. Disconnecting from
    /// `Error` resets the status to `Disconnected`.
    pub async fn disconnect(&self) -> Option<SessionStats> {
        let mut live = self.shared.live.lock().await;

        let Some(session) = live.take() else {
            if self.status() == SessionStatus::Error {
                self.shared.status.send_replace(SessionStatus::Disconnected);
            }
            debug!("Disconnect with no live session");
            return None;
        };

        info!("Disconnecting voice session {}", session.context.session_id);
        let stats = self
            .shared
            .retire(session, SessionStatus::Disconnected)
            .await;
        Some(stats)
    }

    /// Typed fallback turn: create a user item, then request a response
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::InvalidInput("text turn is empty".to_string()));
        }

        let context = self.shared.context().ok_or(Error::NotConnected)?;
        send_turn(&context.sender, text).await?;
        lock(&context.transcript).push_final(Role::User, text);

        debug!("Sent text turn ({} chars)", text.len());
        Ok(())
    }

    /// Replace the local preferences
    ///
    /// Muting while assistant audio plays stops it locally without a truncate.
    pub fn set_preferences(&self, preferences: Preferences) {
        let previous = std::mem::replace(&mut *lock(&self.shared.preferences), preferences);

        if preferences.mute_assistant_audio && !previous.mute_assistant_audio {
            if let Some(context) = self.shared.context() {
                let discarded = context.playback.silence();
                info!("Assistant audio muted ({} chunks discarded)", discarded);
            }
        }
    }

    pub fn preferences(&self) -> Preferences {
        *lock(&self.shared.preferences)
    }

    pub fn status(&self) -> SessionStatus {
        *self.shared.status.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.shared.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == SessionStatus::Connected
    }

    /// Whether the backend's VAD currently hears the user
    pub fn is_user_speaking(&self) -> bool {
        self.shared
            .context()
            .is_some_and(|context| context.user_speaking.load(Ordering::SeqCst))
    }

    /// Transcript of the live session; empty when disconnected
    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.shared
            .context()
            .map(|context| lock(&context.transcript).entries().to_vec())
            .unwrap_or_default()
    }

    /// Live stats, or the final stats of the last session
    pub fn stats(&self) -> Option<SessionStats> {
        match self.shared.context() {
            Some(context) => Some(context.snapshot(self.status())),
            None => lock(&self.shared.last_stats).clone(),
        }
    }

    /// Most recent fatal error, cleared by the next successful connect
    pub fn last_error(&self) -> Option<String> {
        lock(&self.shared.last_error).clone()
    }
}

impl Shared {
    fn context(&self) -> Option<Arc<SessionContext>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn write_current(&self) -> std::sync::RwLockWriteGuard<'_, Option<Arc<SessionContext>>> {
        self.current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Tear a session down and publish the resulting status
    async fn retire(&self, session: LiveSession, status: SessionStatus) -> SessionStats {
        *self.write_current() = None;

        let stats = session.teardown(status).await;
        *lock(&self.last_stats) = Some(stats.clone());
        self.status.send_replace(status);
        stats
    }

    /// Fatal error raised by a session task
    async fn fail(&self, session_id: &str, err: Error) {
        let mut live = self.live.lock().await;

        let matches = live
            .as_ref()
            .is_some_and(|session| session.context.session_id == session_id);
        if !matches {
            debug!("Ignoring failure of retired session {}: {}", session_id, err);
            return;
        }

        error!("Voice session {} failed: {}", session_id, err);
        *lock(&self.last_error) = Some(err.to_string());

        if let Some(session) = live.take() {
            let stats = self.retire(session, SessionStatus::Error).await;
            info!(
                "Session {} torn down after {:.1}s",
                stats.session_id, stats.duration_secs
            );
        }
    }
}

impl LiveSession {
    async fn teardown(mut self, status: SessionStatus) -> SessionStats {
        let tasks = self.tasks;
        let _ = tasks.shutdown.send(true);

        self.capture.stop().await;
        self.context.playback.close();

        join_task("playback driver", tasks.driver).await;
        join_task("dispatcher", tasks.dispatcher).await;
        tasks.watchdog.abort();

        self.playback_device.release();

        let stats = self.context.snapshot(status);
        info!(
            "Session {} closed: {} frames sent, {} chunks played, {} truncations",
            stats.session_id, stats.frames_sent, stats.chunks_played, stats.truncations
        );
        stats
    }
}

async fn join_task(name: &str, mut handle: JoinHandle<()>) {
    match tokio::time::timeout(TASK_JOIN_TIMEOUT, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_panic() => error!("{} task panicked: {}", name, e),
        Ok(Err(_)) => {}
        Err(_) => {
            warn!("{} task did not stop in time, aborting", name);
            handle.abort();
        }
    }
}

async fn send_turn(sender: &SignalingSender, text: &str) -> Result<()> {
    sender.send(&ClientEvent::user_text(text)).await?;
    sender.send(&ClientEvent::ResponseCreate {}).await
}

impl SessionContext {
    fn snapshot(&self, status: SessionStatus) -> SessionStats {
        let playback = self.playback.stats();
        let duration = Utc::now().signed_duration_since(self.started_at);

        SessionStats {
            session_id: self.session_id.clone(),
            status,
            started_at: self.started_at,
            duration_secs: duration.num_milliseconds() as f64 / 1000.0,
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            chunks_played: playback.chunks_played,
            chunks_discarded: playback.chunks_discarded,
            truncations: playback.truncations,
            render_failures: playback.render_failures,
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            conversation_items: lock(&self.items).len(),
            transcript_entries: lock(&self.transcript).len(),
            last_error: lock(&self.last_error).clone(),
        }
    }

    /// Hand a fatal error to the owner; teardown runs outside this task
    fn fail_later(&self, err: Error) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let session_id = self.session_id.clone();
        tokio::spawn(async move { shared.fail(&session_id, err).await });
    }

    fn protocol_error(&self, err: &Error) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
        warn!("Dropping inbound event: {}", err);
    }

    fn is_muted(&self) -> bool {
        self.shared
            .upgrade()
            .is_some_and(|shared| lock(&shared.preferences).mute_assistant_audio)
    }

    async fn handle_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::SpeechStarted { .. } => {
                self.user_speaking.store(true, Ordering::SeqCst);

                if let Some(truncation) = self.playback.interrupt() {
                    lock(&self.items).complete(&truncation.item_id);

                    let truncate =
                        ClientEvent::truncate(truncation.item_id, truncation.audio_end_ms);
                    if let Err(e) = self.sender.send(&truncate).await {
                        warn!("Failed to send truncate: {}", e);
                    }
                }
            }

            ServerEvent::SpeechStopped { .. } => {
                self.user_speaking.store(false, Ordering::SeqCst);
            }

            ServerEvent::UserTranscriptDelta { item_id, delta } => {
                if let Some(item_id) = item_id {
                    if let Err(e) = lock(&self.items).observe(&item_id, Role::User) {
                        self.protocol_error(&e);
                        return;
                    }
                }
                lock(&self.transcript).append_delta(Role::User, &delta);
            }

            ServerEvent::UserTranscriptCompleted {
                item_id,
                transcript,
            } => {
                lock(&self.transcript).complete(Role::User, transcript.as_deref());
                if let Some(item_id) = item_id {
                    lock(&self.items).complete(&item_id);
                }
            }

            ServerEvent::AssistantTranscriptDelta { delta, .. } => {
                lock(&self.transcript).append_delta(Role::Assistant, &delta);
            }

            ServerEvent::AssistantTranscriptDone { transcript, .. } => {
                lock(&self.transcript).complete(Role::Assistant, transcript.as_deref());
            }

            ServerEvent::AssistantAudioDelta { item_id, delta } => {
                self.handle_audio(item_id, &delta);
            }

            ServerEvent::AssistantAudioDone { item_id } => {
                if let Some(item_id) = item_id {
                    lock(&self.items).complete(&item_id);
                }
            }

            ServerEvent::ResponseDone { .. } => {
                debug!("Response done");
            }

            ServerEvent::Error { error } => {
                warn!(
                    "Backend error ({}): {}",
                    error.code.as_deref().unwrap_or("no code"),
                    error.message
                );
                *lock(&self.last_error) = Some(error.message);
            }

            ServerEvent::SessionCreated { .. } | ServerEvent::SessionUpdated { .. } => {
                debug!("Session configuration acknowledged");
            }

            ServerEvent::Unknown => {
                debug!("Ignoring unknown server event");
            }
        }
    }

    fn handle_audio(&self, item_id: Option<String>, delta: &str) {
        let Some(item_id) = item_id else {
            self.protocol_error(&Error::Protocol(
                "audio delta without item_id".to_string(),
            ));
            return;
        };

        // Stragglers of a truncated or aborted item
        if self.playback.is_dropped(&item_id) {
            debug!("Discarding late audio for {}", item_id);
            return;
        }

        if let Err(e) = lock(&self.items).accept_audio(&item_id) {
            self.protocol_error(&e);
            return;
        }

        let samples = match codec::decode_frame(delta) {
            Ok(samples) => samples,
            Err(e) => {
                self.protocol_error(&e);
                return;
            }
        };

        if self.is_muted() {
            return;
        }

        self.playback.enqueue(AudioChunk { item_id, samples });
    }
}

/// Inbound event loop; owns the signaling channel
async fn dispatch(
    context: Arc<SessionContext>,
    mut channel: SignalingChannel,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!("Dispatcher started for {}", context.session_id);

    loop {
        let event = tokio::select! {
            _ = shutdown.changed() => break,
            event = channel.next_event() => event,
        };

        match event {
            Some(Ok(event)) => context.handle_event(event).await,
            Some(Err(e)) if e.is_fatal() => {
                context.fail_later(e);
                break;
            }
            Some(Err(e)) => context.protocol_error(&e),
            None => {
                context.fail_later(Error::Connection(
                    "realtime connection closed by remote".to_string(),
                ));
                break;
            }
        }
    }

    channel.close().await;
    debug!("Dispatcher stopped for {}", context.session_id);
}

/// Ends the session when its credential expires
async fn watch_credential(
    context: Arc<SessionContext>,
    expires_in: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tokio::select! {
        _ = tokio::time::sleep(expires_in) => {
            warn!("Realtime credential expired mid-session");
            context.fail_later(Error::AuthExpired);
        }
        _ = shutdown.changed() => {}
    }
}

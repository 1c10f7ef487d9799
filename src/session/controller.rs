//! Session controller: lifecycle of one streaming conversation.
//!
//! The controller is the only component that starts or tears down hardware.
//! It owns the connection handle, the active flag, the capture and playback
//! pipelines and the caption sidecar, and sequences them:
//!
//! ```text
//! Idle --open()--> Connecting --handshake ok--> Active --close()--> Closed
//!                  Connecting --failure/abort--> Idle (rolled back)
//! ```
//!
//! The active flag is cleared before any teardown step runs, and checked again
//! when a chunk is delivered, so a chunk already in flight when `close` starts
//! is never transmitted.

use crate::alerts::EmergencyWatch;
use crate::audio::types::AudioChunk;
use crate::captions::Captions;
use crate::config::LiveConfig;
use crate::error::{EvaError, Result};
use crate::live::backend::{LiveBackend, LiveConnection, LiveEvent, SendError};
use crate::live::protocol::{ClientMessage, Part, ServerMessage};
use crate::notify::Notifier;
use crate::session::bridge::FunctionBridge;
use crate::session::capture::{CapturePipeline, ChunkSink};
use crate::session::context;
use crate::session::playback::PlaybackPipeline;
use crate::store::{CareStore, ContextSnapshot};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Notify, mpsc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Active,
    Closed,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Active => "active",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

/// Cancels an in-flight [`VoiceSession::open`].
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    inner: Arc<AbortInner>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_one();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once `abort` has been called.
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        self.inner.notify.notified().await;
    }
}

/// Everything a session drives, injected so tests can swap in mocks.
pub struct SessionParts {
    pub backend: Arc<dyn LiveBackend>,
    pub capture: CapturePipeline,
    pub playback: PlaybackPipeline,
    pub captions: Captions,
    pub store: Arc<dyn CareStore>,
    pub notifier: Arc<dyn Notifier>,
}

impl SessionParts {
    /// Real microphone, speaker, caption sidecar and streaming backend.
    #[cfg(feature = "cpal-audio")]
    pub fn from_config(
        config: &crate::config::Config,
        store: Arc<dyn CareStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        use crate::audio::capture::CpalAudioSource;
        use crate::audio::playback::CpalPlayback;
        use crate::audio::recorder::AudioSourceConfig;
        use crate::live::gemini::GeminiBackend;
        use std::time::Duration;

        let source = CpalAudioSource::new(&AudioSourceConfig {
            sample_rate: crate::defaults::INPUT_SAMPLE_RATE,
            device: config.audio.input_device.clone(),
        })?;
        let graph = CpalPlayback::new(config.audio.output_device.as_deref())?;
        let mut playback = PlaybackPipeline::new(Box::new(graph));
        playback.set_gain(config.audio.gain);

        Ok(Self {
            backend: Arc::new(GeminiBackend::new(&config.live)?),
            capture: CapturePipeline::new(
                Box::new(source),
                config.audio.chunk_samples,
                Duration::from_millis(config.audio.poll_interval_ms),
            ),
            playback,
            captions: Captions::detect(config, Arc::clone(&notifier)),
            store,
            notifier,
        })
    }
}

pub struct VoiceSession {
    live: LiveConfig,
    state: SessionState,
    backend: Arc<dyn LiveBackend>,
    connection: Option<Box<dyn LiveConnection>>,
    active: Arc<AtomicBool>,
    capture: CapturePipeline,
    playback: PlaybackPipeline,
    captions: Captions,
    bridge: FunctionBridge,
    emergency: EmergencyWatch,
    store: Arc<dyn CareStore>,
    notifier: Arc<dyn Notifier>,
    forwarded: u64,
}

impl VoiceSession {
    pub fn new(live: LiveConfig, parts: SessionParts) -> Self {
        Self {
            live,
            state: SessionState::Idle,
            backend: parts.backend,
            connection: None,
            active: Arc::new(AtomicBool::new(false)),
            capture: parts.capture,
            playback: parts.playback,
            captions: parts.captions,
            bridge: FunctionBridge::new(Arc::clone(&parts.store)),
            emergency: EmergencyWatch::new(),
            store: parts.store,
            notifier: parts.notifier,
            forwarded: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active && self.active.load(Ordering::SeqCst)
    }

    /// Chunks actually handed to the connection since construction.
    pub fn forwarded_chunks(&self) -> u64 {
        self.forwarded
    }

    pub fn captions_available(&self) -> bool {
        self.captions.is_available()
    }

    /// Open a session for `snapshot`.
    ///
    /// Chunks from the microphone go to `sink`; the caller routes them back to
    /// [`VoiceSession::send`]. Inbound events arrive on the returned queue and
    /// go back to [`VoiceSession::on_live_event`].
    ///
    /// Any session already open is closed first. On failure, everything acquired
    /// so far is released and the state returns to `Idle`.
    ///
    /// # Errors
    /// `HardwareAccess`/`AudioDeviceNotFound` if the microphone or speaker is
    /// unavailable, `Connection` if the handshake or greeting fails, `Cancelled`
    /// if `abort` fires first.
    pub async fn open(
        &mut self,
        snapshot: &ContextSnapshot,
        sink: ChunkSink,
        abort: &AbortHandle,
    ) -> Result<mpsc::UnboundedReceiver<LiveEvent>> {
        if matches!(self.state, SessionState::Connecting | SessionState::Active) {
            tracing::debug!("closing previous session before opening a new one");
            self.close();
        }

        self.state = SessionState::Connecting;
        tracing::debug!("opening session");

        match self.establish(snapshot, sink, abort).await {
            Ok(events) => {
                self.active.store(true, Ordering::SeqCst);
                self.state = SessionState::Active;
                tracing::info!(model = %self.live.model, voice = %self.live.voice, "session active");
                Ok(events)
            }
            Err(e) => {
                tracing::debug!("open failed, rolling back: {}", e);
                self.teardown();
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    async fn establish(
        &mut self,
        snapshot: &ContextSnapshot,
        sink: ChunkSink,
        abort: &AbortHandle,
    ) -> Result<mpsc::UnboundedReceiver<LiveEvent>> {
        self.playback.resume().map_err(|e| match e {
            EvaError::HardwareAccess { .. } | EvaError::AudioDeviceNotFound { .. } => e,
            other => EvaError::HardwareAccess {
                message: other.to_string(),
            },
        })?;
        self.playback.reset_clock();
        self.capture.acquire()?;

        let setup = context::live_setup(&self.live, snapshot);
        let backend = Arc::clone(&self.backend);
        let link = tokio::select! {
            biased;
            _ = abort.aborted() => return Err(EvaError::Cancelled),
            link = backend.connect(&setup) => link?,
        };
        self.connection = Some(link.connection);

        if self.live.greeting
            && let Some(connection) = self.connection.as_ref()
        {
            connection
                .send_text(context::GREETING_PROMPT)
                .map_err(|e| EvaError::Connection {
                    message: format!("greeting not delivered: {}", e),
                })?;
        }

        self.capture.start_streaming(Arc::clone(&self.active), sink)?;
        self.captions.start();
        Ok(link.events)
    }

    /// Forward one captured chunk. A no-op unless the session is active.
    ///
    /// Returns whether the chunk was handed to the connection.
    pub fn send(&mut self, chunk: &AudioChunk) -> bool {
        if !self.is_active() {
            tracing::trace!(sequence = chunk.sequence, "dropping chunk: session not active");
            return false;
        }
        if self.deliver(ClientMessage::audio(chunk)) {
            self.forwarded += 1;
            true
        } else {
            false
        }
    }

    /// Dispatch one decoded inbound message.
    pub fn on_inbound_message(&mut self, message: ServerMessage) {
        if !self.is_active() {
            tracing::trace!("ignoring message for inactive session");
            return;
        }

        if message.interrupted {
            self.playback.interrupt();
        }

        for part in message.parts {
            match part {
                Part::Audio { data, sample_rate } => {
                    if let Err(e) = self.playback.enqueue(&data, sample_rate) {
                        tracing::warn!("dropping audio frame: {}", e);
                    }
                }
                Part::FunctionCall(call) => {
                    if let Some(response) = self.bridge.handle(&call) {
                        self.deliver(ClientMessage::function_response(response));
                    }
                }
                Part::Text(text) => {
                    tracing::debug!(text = %text, "model text");
                    match self.emergency.scan(&text, self.store.as_ref()) {
                        Ok(Some(alert)) => tracing::info!(id = alert.id, "emergency alert raised"),
                        Ok(None) => {}
                        Err(e) => tracing::warn!("failed to record emergency alert: {}", e),
                    }
                }
                Part::Other => {}
            }
            // A failed reply may have torn the session down mid-message.
            if !self.is_active() {
                return;
            }
        }

        if message.turn_complete {
            tracing::trace!("model turn complete");
        }
    }

    /// Handle one event from the connection's inbound queue.
    pub fn on_live_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::Open => tracing::debug!("connection open"),
            LiveEvent::Message(message) => self.on_inbound_message(message),
            LiveEvent::Malformed(reason) => tracing::warn!("skipping malformed frame: {}", reason),
            LiveEvent::Closed { reason } => {
                if self.is_active() {
                    self.connection_lost(&format!("conexão encerrada ({})", reason));
                } else {
                    tracing::debug!(reason = %reason, "connection closed");
                }
            }
            LiveEvent::Error(message) => {
                if self.is_active() {
                    self.connection_lost(&message);
                } else {
                    tracing::debug!("connection error after close: {}", message);
                }
            }
        }
    }

    /// Tear the session down. Idempotent and callable in any state.
    pub fn close(&mut self) {
        let was = self.state;
        self.teardown();
        if was != SessionState::Idle {
            self.state = SessionState::Closed;
        }
        if was == SessionState::Active {
            tracing::info!("session closed");
        }
    }

    /// Release everything in order: active flag, microphone and framing stage,
    /// captions, playback sources, connection. Each step is independent.
    fn teardown(&mut self) {
        self.active.store(false, Ordering::SeqCst);
        self.capture.release();
        self.captions.stop();
        self.playback.stop_all();
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
    }

    /// Send `message` on the open connection; a failure while active ends the session.
    fn deliver(&mut self, message: ClientMessage) -> bool {
        let Some(connection) = self.connection.as_ref() else {
            tracing::trace!("{}", EvaError::SendAfterClose);
            return false;
        };
        match connection.send(message) {
            Ok(()) => true,
            Err(e) if !self.is_active() => {
                tracing::trace!("{}: {}", EvaError::SendAfterClose, e);
                false
            }
            Err(e) => {
                let reason = match e {
                    SendError::Closed => "conexão encerrada".to_string(),
                    SendError::Transport(message) => message,
                };
                self.connection_lost(&reason);
                false
            }
        }
    }

    fn connection_lost(&mut self, reason: &str) {
        let error = EvaError::Connection {
            message: reason.to_string(),
        };
        tracing::error!("{}", error);
        self.notifier.error(&format!("Conexão com a EVA perdida: {}", reason));
        self.close();
    }
}

impl Drop for VoiceSession {
    fn drop(&mut self) {
        self.teardown();
    }
}

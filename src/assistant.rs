//! Voice assistant: one session per instance, driven by a single event queue.
//!
//! Microphone chunks, connection events and control commands all land on one
//! mpsc queue consumed by one task, which is the only code touching the
//! [`VoiceSession`]. Callers hold a cloneable [`VoiceAssistant`] handle.

use crate::audio::types::AudioChunk;
use crate::error::{EvaError, Result};
use crate::live::backend::LiveEvent;
use crate::notify::Notifier;
use crate::session::{AbortHandle, ChunkSink, SessionState, VoiceSession};
use crate::store::{CareStore, ContextSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

/// What the single toggle control shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToggleState {
    NotReady,
    Connecting,
    Active,
    Idle,
}

impl ToggleState {
    /// The control ignores presses while not ready or connecting.
    pub fn disabled(self) -> bool {
        matches!(self, ToggleState::NotReady | ToggleState::Connecting)
    }

    pub fn label(self) -> &'static str {
        match self {
            ToggleState::NotReady => "not ready",
            ToggleState::Connecting => "connecting",
            ToggleState::Active => "active",
            ToggleState::Idle => "idle",
        }
    }
}

impl From<SessionState> for ToggleState {
    fn from(state: SessionState) -> Self {
        match state {
            SessionState::Connecting => ToggleState::Connecting,
            SessionState::Active => ToggleState::Active,
            SessionState::Idle | SessionState::Closed => ToggleState::Idle,
        }
    }
}

impl std::fmt::Display for ToggleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Start,
    Stop,
    Toggle,
    Shutdown,
}

/// Everything the session task reacts to. `epoch` tags events with the open
/// that produced them so leftovers from an earlier session are dropped.
enum SessionEvent {
    Chunk { epoch: u64, chunk: AudioChunk },
    Live { epoch: u64, event: LiveEvent },
    Control(Control, oneshot::Sender<ToggleState>),
}

/// Cloneable handle to a running assistant.
#[derive(Clone)]
pub struct VoiceAssistant {
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Receiver<ToggleState>,
    pending_open: Arc<Mutex<Option<AbortHandle>>>,
    captions: bool,
}

impl VoiceAssistant {
    /// Spawn the session task on the current tokio runtime.
    pub fn spawn(
        session: VoiceSession,
        store: Arc<dyn CareStore>,
        notifier: Arc<dyn Notifier>,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ToggleState::NotReady);
        let pending_open = Arc::new(Mutex::new(None));
        let captions = session.captions_available();

        let worker = SessionWorker {
            session,
            store,
            notifier,
            events: tx.clone(),
            state: state_tx,
            pending_open: Arc::clone(&pending_open),
            epoch: 0,
        };
        let task = tokio::spawn(worker.run(rx));

        let handle = Self {
            events: tx,
            state: state_rx,
            pending_open,
            captions,
        };
        (handle, task)
    }

    pub fn state(&self) -> ToggleState {
        *self.state.borrow()
    }

    /// Watch toggle-state changes.
    pub fn subscribe(&self) -> watch::Receiver<ToggleState> {
        self.state.clone()
    }

    pub fn captions_available(&self) -> bool {
        self.captions
    }

    pub async fn start(&self) -> Result<ToggleState> {
        self.request(Control::Start).await
    }

    /// Stop the conversation; an open still in progress is aborted.
    pub async fn stop(&self) -> Result<ToggleState> {
        self.abort_pending_open();
        self.request(Control::Stop).await
    }

    /// Press the toggle. Ignored while the control is disabled.
    pub async fn toggle(&self) -> Result<ToggleState> {
        let current = self.state();
        if current.disabled() {
            tracing::debug!(state = %current, "toggle ignored while disabled");
            return Ok(current);
        }
        self.request(Control::Toggle).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.abort_pending_open();
        self.request(Control::Shutdown).await.map(|_| ())
    }

    fn abort_pending_open(&self) {
        if let Ok(pending) = self.pending_open.lock()
            && let Some(abort) = pending.as_ref()
        {
            abort.abort();
        }
    }

    async fn request(&self, control: Control) -> Result<ToggleState> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.events
            .send(SessionEvent::Control(control, reply_tx))
            .map_err(|_| EvaError::Other("assistant is not running".to_string()))?;
        reply_rx
            .await
            .map_err(|_| EvaError::Other("assistant stopped before replying".to_string()))
    }
}

struct SessionWorker {
    session: VoiceSession,
    store: Arc<dyn CareStore>,
    notifier: Arc<dyn Notifier>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: watch::Sender<ToggleState>,
    pending_open: Arc<Mutex<Option<AbortHandle>>>,
    epoch: u64,
}

impl SessionWorker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<SessionEvent>) {
        self.publish();
        tracing::debug!("assistant ready");

        while let Some(event) = rx.recv().await {
            match event {
                SessionEvent::Chunk { epoch, chunk } => {
                    if epoch == self.epoch {
                        self.session.send(&chunk);
                    }
                }
                SessionEvent::Live { epoch, event } => {
                    if epoch == self.epoch {
                        self.session.on_live_event(event);
                        self.publish();
                    } else {
                        tracing::trace!("dropping event from a previous session");
                    }
                }
                SessionEvent::Control(control, reply) => {
                    match control {
                        Control::Start => self.start().await,
                        Control::Stop => self.stop(),
                        Control::Toggle => {
                            if self.session.is_active() {
                                self.stop();
                            } else {
                                self.start().await;
                            }
                        }
                        Control::Shutdown => {
                            self.session.close();
                            self.publish();
                            reply.send(self.current()).ok();
                            break;
                        }
                    }
                    reply.send(self.current()).ok();
                }
            }
        }

        self.session.close();
        tracing::debug!("assistant stopped");
    }

    fn current(&self) -> ToggleState {
        ToggleState::from(self.session.state())
    }

    fn publish(&self) {
        let state = self.current();
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
    }

    async fn start(&mut self) {
        if self.session.is_active() {
            return;
        }

        self.epoch += 1;
        let epoch = self.epoch;

        let snapshot = self.store.snapshot().unwrap_or_else(|e| {
            tracing::warn!("context snapshot unavailable, opening without it: {}", e);
            ContextSnapshot::default()
        });

        let chunks = self.events.clone();
        let sink: ChunkSink = Arc::new(move |chunk| {
            chunks.send(SessionEvent::Chunk { epoch, chunk }).ok();
        });

        let abort = AbortHandle::new();
        if let Ok(mut pending) = self.pending_open.lock() {
            *pending = Some(abort.clone());
        }
        self.state.send_replace(ToggleState::Connecting);

        let result = self.session.open(&snapshot, sink, &abort).await;

        if let Ok(mut pending) = self.pending_open.lock() {
            *pending = None;
        }

        match result {
            Ok(mut inbound) => {
                let forward = self.events.clone();
                tokio::spawn(async move {
                    while let Some(event) = inbound.recv().await {
                        if forward.send(SessionEvent::Live { epoch, event }).is_err() {
                            break;
                        }
                    }
                });
                self.notifier.success("EVA conectada. Pode falar.");
            }
            Err(EvaError::Cancelled) => tracing::info!("session open cancelled"),
            Err(e) => {
                tracing::error!("failed to open session: {}", e);
                let message = match e {
                    EvaError::HardwareAccess { .. } | EvaError::AudioDeviceNotFound { .. } => {
                        format!("Microfone indisponível: {}", e)
                    }
                    _ => format!("Não foi possível conectar à EVA: {}", e),
                };
                self.notifier.error(&message);
            }
        }
        self.publish();
    }

    fn stop(&mut self) {
        let was_active = self.session.is_active();
        self.session.close();
        if was_active {
            self.notifier.info("Conversa encerrada.");
        }
        self.publish();
    }
}

//! Streaming backend abstraction.
//!
//! A [`LiveBackend`] opens a session and hands back a [`LiveLink`]: the send half
//! as a [`LiveConnection`] and the inbound half as a queue of [`LiveEvent`]s.

use crate::audio::types::AudioChunk;
use crate::error::{EvaError, Result};
use crate::live::protocol::{ClientMessage, FunctionResponse, LiveSetup, ServerMessage};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

/// Inbound notifications from an open session.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    Open,
    Message(ServerMessage),
    /// A frame that could not be decoded. The session continues.
    Malformed(String),
    Closed { reason: String },
    Error(String),
}

/// Why an outbound message was not delivered.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    /// The connection is closed or closing.
    #[error("connection closed")]
    Closed,
    #[error("transport error: {0}")]
    Transport(String),
}

/// Send half of an open session.
pub trait LiveConnection: Send {
    fn send(&self, message: ClientMessage) -> std::result::Result<(), SendError>;

    /// Close the connection. Idempotent.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn send_realtime_input(&self, chunk: &AudioChunk) -> std::result::Result<(), SendError> {
        self.send(ClientMessage::audio(chunk))
    }

    fn send_function_response(
        &self,
        response: FunctionResponse,
    ) -> std::result::Result<(), SendError> {
        self.send(ClientMessage::function_response(response))
    }

    fn send_text(&self, text: &str) -> std::result::Result<(), SendError> {
        self.send(ClientMessage::text_turn(text))
    }
}

/// An open session: outbound connection plus inbound event queue.
pub struct LiveLink {
    pub connection: Box<dyn LiveConnection>,
    pub events: mpsc::UnboundedReceiver<LiveEvent>,
}

impl std::fmt::Debug for LiveLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveLink")
            .field("open", &self.connection.is_open())
            .finish()
    }
}

/// Opens streaming sessions.
#[async_trait]
pub trait LiveBackend: Send + Sync {
    /// Connect and complete the handshake.
    ///
    /// # Errors
    /// Returns `EvaError::Connection` if the handshake does not complete.
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveLink>;
}

// ---------------------------------------------------------------------------
// Mock backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MockBackendState {
    setups: Vec<LiveSetup>,
    sent: Vec<ClientMessage>,
    connects: usize,
    close_calls: usize,
    open: bool,
    events: Option<mpsc::UnboundedSender<LiveEvent>>,
    fail_handshake: bool,
    handshake_delay: Option<Duration>,
    send_error: Option<SendError>,
}

/// Shared view into a [`MockBackend`] and its connections.
#[derive(Debug, Clone, Default)]
pub struct MockBackendProbe {
    state: Arc<Mutex<MockBackendState>>,
}

impl MockBackendProbe {
    fn with<R>(&self, f: impl FnOnce(&mut MockBackendState) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    pub fn connects(&self) -> usize {
        self.with(|s| s.connects)
    }

    pub fn setups(&self) -> Vec<LiveSetup> {
        self.with(|s| s.setups.clone())
    }

    pub fn sent(&self) -> Vec<ClientMessage> {
        self.with(|s| s.sent.clone())
    }

    /// Audio chunks delivered to the backend.
    pub fn sent_audio(&self) -> usize {
        self.with(|s| {
            s.sent
                .iter()
                .filter(|m| matches!(m, ClientMessage::RealtimeInput(_)))
                .count()
        })
    }

    pub fn function_responses(&self) -> Vec<FunctionResponse> {
        self.with(|s| {
            s.sent
                .iter()
                .filter_map(|m| match m {
                    ClientMessage::ToolResponse(r) => Some(r.function_responses.clone()),
                    _ => None,
                })
                .flatten()
                .collect()
        })
    }

    pub fn text_turns(&self) -> usize {
        self.with(|s| {
            s.sent
                .iter()
                .filter(|m| matches!(m, ClientMessage::ClientContent(_)))
                .count()
        })
    }

    pub fn close_calls(&self) -> usize {
        self.with(|s| s.close_calls)
    }

    pub fn is_open(&self) -> bool {
        self.with(|s| s.open)
    }

    /// Make every later send fail with `error` (simulates a dropped socket).
    pub fn fail_sends(&self, error: SendError) {
        self.with(|s| s.send_error = Some(error));
    }

    /// Deliver an inbound event on the most recent connection.
    pub fn emit(&self, event: LiveEvent) -> bool {
        self.with(|s| s.events.as_ref().is_some_and(|tx| tx.send(event).is_ok()))
    }
}

/// In-memory backend recording everything sent to it.
#[derive(Debug, Clone, Default)]
pub struct MockBackend {
    probe: MockBackendProbe,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every handshake.
    pub fn with_handshake_failure(self) -> Self {
        self.probe.with(|s| s.fail_handshake = true);
        self
    }

    /// Delay every handshake.
    pub fn with_handshake_delay(self, delay: Duration) -> Self {
        self.probe.with(|s| s.handshake_delay = Some(delay));
        self
    }

    pub fn probe(&self) -> MockBackendProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl LiveBackend for MockBackend {
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveLink> {
        let delay = self.probe.with(|s| {
            s.connects += 1;
            s.setups.push(setup.clone());
            s.handshake_delay
        });
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.probe.with(|s| s.fail_handshake) {
            return Err(EvaError::Connection {
                message: "handshake rejected".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(LiveEvent::Open).ok();
        self.probe.with(|s| {
            s.open = true;
            s.events = Some(tx);
        });

        Ok(LiveLink {
            connection: Box::new(MockConnection {
                probe: self.probe.clone(),
                closed: false,
            }),
            events: rx,
        })
    }
}

struct MockConnection {
    probe: MockBackendProbe,
    closed: bool,
}

impl LiveConnection for MockConnection {
    fn send(&self, message: ClientMessage) -> std::result::Result<(), SendError> {
        if self.closed {
            return Err(SendError::Closed);
        }
        self.probe.with(|s| {
            if let Some(err) = s.send_error.clone() {
                return Err(err);
            }
            s.sent.push(message);
            Ok(())
        })
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.probe.with(|s| {
            s.close_calls += 1;
            s.open = false;
            s.events = None;
        });
    }

    fn is_open(&self) -> bool {
        !self.closed
    }
}

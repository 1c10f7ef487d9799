//! WebSocket client for the Gemini Live bidirectional streaming API.

use crate::config::LiveConfig;
use crate::error::{EvaError, Result};
use crate::live::backend::{LiveBackend, LiveConnection, LiveEvent, LiveLink, SendError};
use crate::live::protocol::{ClientMessage, LiveSetup, ServerMessage};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Commands for the socket writer task.
enum Outbound {
    Text(String),
    Close,
}

/// Gemini Live over a secure WebSocket.
#[derive(Debug, Clone)]
pub struct GeminiBackend {
    endpoint: String,
    api_key: String,
    handshake_timeout: Duration,
}

impl GeminiBackend {
    /// # Errors
    /// Returns `EvaError::ConfigInvalidValue` if no API key is configured.
    pub fn new(config: &LiveConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| EvaError::ConfigInvalidValue {
                key: "live.api_key".to_string(),
                message: "no API key configured (set EVA_API_KEY)".to_string(),
            })?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key,
            handshake_timeout: Duration::from_millis(config.handshake_timeout_ms),
        })
    }

    fn url(&self) -> String {
        format!("{}?key={}", self.endpoint, self.api_key)
    }

    async fn handshake(&self, setup: &LiveSetup) -> Result<LiveLink> {
        let (ws, _response) = connect_async(self.url())
            .await
            .map_err(|e| EvaError::Connection {
                message: format!("failed to connect to {}: {}", self.endpoint, e),
            })?;
        tracing::debug!(endpoint = %self.endpoint, "socket open, sending setup");

        let (mut sink, mut stream) = ws.split();
        sink.send(Message::Text(setup.to_message().to_json()?.into()))
            .await
            .map_err(|e| EvaError::Connection {
                message: format!("failed to send setup: {}", e),
            })?;

        loop {
            let payload = match stream.next().await {
                Some(Ok(Message::Text(text))) => text.as_bytes().to_vec(),
                Some(Ok(Message::Binary(bytes))) => bytes.to_vec(),
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .unwrap_or_else(|| "no reason given".to_string());
                    return Err(EvaError::Connection {
                        message: format!("server closed during handshake: {}", reason),
                    });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(EvaError::Connection {
                        message: format!("socket error during handshake: {}", e),
                    });
                }
                None => {
                    return Err(EvaError::Connection {
                        message: "socket ended during handshake".to_string(),
                    });
                }
            };

            match ServerMessage::parse(&payload) {
                Ok(message) if message.setup_complete => break,
                Ok(_) => tracing::debug!("ignoring message before setupComplete"),
                Err(e) => tracing::warn!("malformed handshake frame: {}", e),
            }
        }

        let open = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        event_tx.send(LiveEvent::Open).ok();

        let writer_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(command) = out_rx.recv().await {
                match command {
                    Outbound::Text(json) => {
                        if let Err(e) = sink.send(Message::Text(json.into())).await {
                            tracing::debug!("socket write failed: {}", e);
                            writer_open.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    Outbound::Close => {
                        sink.send(Message::Close(None)).await.ok();
                        break;
                    }
                }
            }
            writer_open.store(false, Ordering::SeqCst);
            sink.close().await.ok();
        });

        let reader_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                let event = match frame {
                    Ok(Message::Text(text)) => decode_event(text.as_bytes()),
                    Ok(Message::Binary(bytes)) => decode_event(&bytes),
                    Ok(Message::Close(frame)) => {
                        reader_open.store(false, Ordering::SeqCst);
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_default();
                        event_tx.send(LiveEvent::Closed { reason }).ok();
                        return;
                    }
                    Ok(_) => continue,
                    Err(e) => {
                        reader_open.store(false, Ordering::SeqCst);
                        event_tx.send(LiveEvent::Error(e.to_string())).ok();
                        return;
                    }
                };
                if event_tx.send(event).is_err() {
                    // Nobody is listening anymore
                    return;
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            event_tx
                .send(LiveEvent::Closed {
                    reason: "stream ended".to_string(),
                })
                .ok();
        });

        Ok(LiveLink {
            connection: Box::new(GeminiConnection {
                outbound: Some(out_tx),
                open,
            }),
            events: event_rx,
        })
    }
}

fn decode_event(payload: &[u8]) -> LiveEvent {
    match ServerMessage::parse(payload) {
        Ok(message) => LiveEvent::Message(message),
        Err(e) => LiveEvent::Malformed(e.to_string()),
    }
}

#[async_trait]
impl LiveBackend for GeminiBackend {
    async fn connect(&self, setup: &LiveSetup) -> Result<LiveLink> {
        tokio::time::timeout(self.handshake_timeout, self.handshake(setup))
            .await
            .map_err(|_| EvaError::Connection {
                message: format!(
                    "handshake did not complete within {} ms",
                    self.handshake_timeout.as_millis()
                ),
            })?
    }
}

struct GeminiConnection {
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    open: Arc<AtomicBool>,
}

impl LiveConnection for GeminiConnection {
    fn send(&self, message: ClientMessage) -> std::result::Result<(), SendError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(SendError::Closed);
        }
        let outbound = self.outbound.as_ref().ok_or(SendError::Closed)?;
        let json = message
            .to_json()
            .map_err(|e| SendError::Transport(e.to_string()))?;
        outbound
            .send(Outbound::Text(json))
            .map_err(|_| SendError::Closed)
    }

    fn close(&mut self) {
        self.open.store(false, Ordering::SeqCst);
        if let Some(outbound) = self.outbound.take() {
            outbound.send(Outbound::Close).ok();
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.outbound.is_some()
    }
}

impl Drop for GeminiConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(key: Option<&str>) -> LiveConfig {
        LiveConfig {
            api_key: key.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn new_requires_api_key() {
        assert!(matches!(
            GeminiBackend::new(&config(None)),
            Err(EvaError::ConfigInvalidValue { .. })
        ));
        assert!(GeminiBackend::new(&config(Some("  "))).is_err());
    }

    #[test]
    fn url_carries_key_as_query() {
        let backend = GeminiBackend::new(&config(Some("secret"))).unwrap();
        let url = backend.url();
        assert!(url.starts_with("wss://"));
        assert!(url.ends_with("?key=secret"));
    }

    #[test]
    fn decode_event_maps_garbage_to_malformed() {
        assert!(matches!(decode_event(b"{oops"), LiveEvent::Malformed(_)));
        assert!(matches!(
            decode_event(br#"{"serverContent":{"turnComplete":true}}"#),
            LiveEvent::Message(m) if m.turn_complete
        ));
    }

    #[tokio::test]
    async fn connection_reports_closed_after_close() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut conn = GeminiConnection {
            outbound: Some(tx),
            open: Arc::new(AtomicBool::new(true)),
        };
        assert!(conn.is_open());
        conn.close();
        conn.close();
        assert!(!conn.is_open());
        assert_eq!(
            conn.send(ClientMessage::text_turn("late")),
            Err(SendError::Closed)
        );
    }

    #[tokio::test]
    async fn connect_to_unreachable_endpoint_is_connection_error() {
        let backend = GeminiBackend::new(&LiveConfig {
            endpoint: "ws://127.0.0.1:9".to_string(),
            api_key: Some("k".to_string()),
            handshake_timeout_ms: 2000,
            ..Default::default()
        })
        .unwrap();
        let setup = LiveSetup {
            model: "m".to_string(),
            voice: "v".to_string(),
            system_instruction: String::new(),
            functions: Vec::new(),
        };
        assert!(matches!(
            backend.connect(&setup).await,
            Err(EvaError::Connection { .. })
        ));
    }
}

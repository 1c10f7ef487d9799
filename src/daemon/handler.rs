//! IPC command handler backed by a [`VoiceAssistant`].

use crate::assistant::{ToggleState, VoiceAssistant};
use crate::error::Result;
use crate::ipc::protocol::{Command, Response};
use crate::ipc::server::CommandHandler;
use std::sync::Arc;
use tokio::sync::Notify;

pub struct AssistantCommandHandler {
    assistant: VoiceAssistant,
    shutdown: Arc<Notify>,
}

impl AssistantCommandHandler {
    /// `shutdown` is notified once a `Shutdown` command has stopped the assistant.
    pub fn new(assistant: VoiceAssistant, shutdown: Arc<Notify>) -> Self {
        Self {
            assistant,
            shutdown,
        }
    }

    fn status(&self) -> Response {
        let state = self.assistant.state();
        Response::Status {
            state,
            disabled: state.disabled(),
            captions: self.assistant.captions_available(),
        }
    }
}

fn state_response(result: Result<ToggleState>) -> Response {
    match result {
        Ok(state) => Response::State { state },
        Err(e) => Response::Error {
            message: e.to_string(),
        },
    }
}

#[async_trait::async_trait]
impl CommandHandler for AssistantCommandHandler {
    async fn handle(&self, command: Command) -> Response {
        match command {
            Command::Toggle => state_response(self.assistant.toggle().await),
            Command::Start => state_response(self.assistant.start().await),
            Command::Stop => state_response(self.assistant.stop().await),
            Command::Status => self.status(),
            Command::Shutdown => {
                if let Err(e) = self.assistant.shutdown().await {
                    tracing::warn!("assistant shutdown: {}", e);
                }
                self.shutdown.notify_one();
                Response::Ok
            }
        }
    }
}

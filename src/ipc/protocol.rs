//! JSON-line messages between the control CLI and a running assistant.

use crate::assistant::ToggleState;
use serde::{Deserialize, Serialize};

/// Commands sent by the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Press the toggle (ignored while it is disabled)
    Toggle,
    /// Start a conversation
    Start,
    /// Stop the conversation, aborting one that is still connecting
    Stop,
    /// Report the toggle state
    Status,
    /// Stop the assistant process
    Shutdown,
}

impl Command {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

/// Responses sent back to the CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Ok,
    /// Toggle state after the command ran
    State { state: ToggleState },
    Status {
        state: ToggleState,
        disabled: bool,
        captions: bool,
    },
    Error { message: String },
}

impl Response {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        assert_eq!(Command::Toggle.to_json().unwrap(), r#"{"type":"toggle"}"#);
        assert_eq!(Command::Status.to_json().unwrap(), r#"{"type":"status"}"#);
        assert_eq!(
            Command::from_json(r#"{"type":"shutdown"}"#).unwrap(),
            Command::Shutdown
        );
    }

    #[test]
    fn test_state_response_uses_snake_case_states() {
        let json = Response::State {
            state: ToggleState::NotReady,
        }
        .to_json()
        .unwrap();
        assert_eq!(json, r#"{"type":"state","state":"not_ready"}"#);
    }

    #[test]
    fn test_status_response_parses() {
        let response = Response::from_json(
            r#"{"type":"status","state":"connecting","disabled":true,"captions":false}"#,
        )
        .unwrap();
        assert_eq!(
            response,
            Response::Status {
                state: ToggleState::Connecting,
                disabled: true,
                captions: false,
            }
        );
    }

    #[test]
    fn test_invalid_json_returns_error() {
        assert!(Command::from_json(r#"{"type": "cancel"}"#).is_err());
        assert!(Command::from_json(r#"{"invalid": "json"}"#).is_err());
        assert!(Command::from_json("not json at all").is_err());
    }
}

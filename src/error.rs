//! Error types for eva-voice.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvaError {
    // Configuration errors
    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Hardware errors (microphone, output device)
    #[error("Audio device not found: {device}")]
    AudioDeviceNotFound { device: String },

    #[error("Hardware access failed: {message}")]
    HardwareAccess { message: String },

    // Streaming session errors
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Failed to decode audio frame: {message}")]
    Decode { message: String },

    #[error("Send attempted on a closed session")]
    SendAfterClose,

    #[error("Unknown function call: {name}")]
    UnknownFunctionCall { name: String },

    #[error("Session open cancelled")]
    Cancelled,

    #[error("Wire protocol error: {message}")]
    Protocol { message: String },

    // Caption sidecar errors
    #[error("Caption recognizer error: {message}")]
    Captions { message: String },

    // Application state errors
    #[error("Store error: {message}")]
    Store { message: String },

    // IPC errors
    #[error("IPC socket error: {message}")]
    IpcSocket { message: String },

    #[error("IPC protocol error: {message}")]
    IpcProtocol { message: String },

    #[error("IPC connection failed: {message}")]
    IpcConnection { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl EvaError {
    /// True for errors that abort starting a session.
    pub fn is_fatal_to_open(&self) -> bool {
        matches!(
            self,
            EvaError::HardwareAccess { .. }
                | EvaError::AudioDeviceNotFound { .. }
                | EvaError::Connection { .. }
                | EvaError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, EvaError>;

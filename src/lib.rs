//! eva-voice - real-time voice assistant client for the EVA care service
//!
//! Streams the microphone to a live speech model, plays its spoken replies,
//! answers its function calls against the care store and shows optional
//! on-device captions.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod alerts;
pub mod assistant;
pub mod audio;
pub mod captions;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod daemon;
pub mod defaults;
pub mod error;
pub mod ipc;
pub mod live;
pub mod notify;
pub mod session;
pub mod store;

// Hardware and transport seams
pub use audio::playback::PlaybackGraph;
pub use audio::recorder::AudioSource;
pub use captions::CaptionRecognizer;
pub use live::{LiveBackend, LiveConnection};
pub use notify::Notifier;
pub use store::CareStore;

// Session
pub use assistant::{ToggleState, VoiceAssistant};
pub use session::{AbortHandle, SessionParts, SessionState, VoiceSession};

// Error handling
pub use error::{EvaError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

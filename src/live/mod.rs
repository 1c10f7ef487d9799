//! Bidirectional streaming connection to the speech model.

pub mod backend;
pub mod gemini;
pub mod protocol;

pub use backend::{LiveBackend, LiveConnection, LiveEvent, LiveLink, SendError};
pub use protocol::{FunctionCall, FunctionResponse, LiveSetup, Part, ServerMessage};

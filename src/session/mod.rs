//! One conversation with the speech model and the pipelines around it.

pub mod bridge;
pub mod capture;
pub mod context;
pub mod controller;
pub mod playback;

pub use bridge::FunctionBridge;
pub use capture::{CapturePipeline, ChunkSink};
pub use controller::{AbortHandle, SessionParts, SessionState, VoiceSession};
pub use playback::PlaybackPipeline;

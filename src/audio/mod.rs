#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod framer;
pub mod pcm;
pub mod playback;
pub mod recorder;
pub mod types;
pub mod vad;

//! Default configuration constants for eva-voice.
//!
//! Shared by the config types and the session pieces so the wire format,
//! the capture side and the playback side agree on rates and sizes.

/// Microphone capture rate in Hz.
///
/// The streaming backend expects 16 kHz mono 16-bit PCM on the realtime input.
pub const INPUT_SAMPLE_RATE: u32 = 16000;

/// Sample rate of the audio the backend streams back, in Hz (mono, 16-bit).
pub const OUTPUT_SAMPLE_RATE: u32 = 24000;

/// Samples per outbound chunk.
///
/// 1600 samples at 16 kHz is 100 ms of audio per realtime-input message.
pub const CHUNK_SAMPLES: usize = 1600;

/// How often the capture thread drains the microphone buffer.
pub const POLL_INTERVAL_MS: u64 = 16;

/// MIME type attached to every outbound audio chunk.
pub const INPUT_MIME_TYPE: &str = "audio/pcm;rate=16000";

/// Speech model used for the live session.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";

/// Prebuilt voice used for responses.
pub const DEFAULT_VOICE: &str = "Aoede";

/// Bidirectional streaming endpoint.
pub const DEFAULT_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Time allowed between opening the socket and receiving `setupComplete`.
pub const HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default playback gain.
pub const OUTPUT_GAIN: f32 = 1.0;

/// Caption language passed to the local recognizer.
pub const CAPTION_LANGUAGE: &str = "pt";

/// RMS threshold above which the caption sidecar considers a frame speech.
pub const CAPTION_SPEECH_THRESHOLD: f32 = 0.02;

/// Silence that closes an utterance for the caption sidecar.
pub const CAPTION_SILENCE_MS: u32 = 800;

/// Shortest utterance the caption sidecar bothers to transcribe.
pub const CAPTION_MIN_SPEECH_MS: u32 = 300;

/// Name of the local function the backend may call to register a client.
pub const REGISTER_CLIENT_FN: &str = "registerClient";

/// Name of the local function that raises an alert for the family.
pub const ALERT_FAMILY_FN: &str = "alertFamily";

/// Name of the local function that confirms a medication was taken.
pub const CONFIRM_MEDICATION_FN: &str = "confirmMedication";

/// Alert kind raised by the emergency keyword watch.
pub const EMERGENCY_ALERT_KIND: &str = "PASSA_MAL";

/// Duration in seconds of `samples` mono samples at `rate` Hz.
pub fn duration_secs(samples: usize, rate: u32) -> f64 {
    if rate == 0 {
        return 0.0;
    }
    samples as f64 / rate as f64
}

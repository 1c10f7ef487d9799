//! Voice activity detection for the caption sidecar.
//!
//! RMS thresholding with a short hangover so that pauses between words do not
//! split an utterance. Unlike a push-to-talk detector, this one re-arms after
//! every utterance so the caption stream can run for a whole conversation.

use crate::defaults;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Trait for time operations, allowing mock time in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Real system clock using `std::time::Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock for tests.
#[derive(Debug, Clone)]
pub struct MockClock {
    current: Arc<Mutex<Instant>>,
}

impl MockClock {
    pub fn new() -> Self {
        Self {
            current: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut current) = self.current.lock() {
            *current += duration;
        }
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.current
            .lock()
            .map(|current| *current)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Configuration for Voice Activity Detection.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS threshold for detecting speech (0.0 to 1.0).
    pub speech_threshold: f32,
    /// Silence that ends an utterance (milliseconds).
    pub silence_duration_ms: u32,
    /// Utterances shorter than this are reported as noise (milliseconds).
    pub min_speech_ms: u32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            speech_threshold: defaults::CAPTION_SPEECH_THRESHOLD,
            silence_duration_ms: defaults::CAPTION_SILENCE_MS,
            min_speech_ms: defaults::CAPTION_MIN_SPEECH_MS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadState {
    Idle,
    Speaking,
    /// Silence seen during speech, waiting to confirm the end.
    MaybeSilence,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadEvent {
    SpeechStart,
    Speech,
    Silence,
    /// Utterance finished and was long enough to transcribe.
    SpeechEnd,
    /// Utterance finished but was shorter than `min_speech_ms`.
    Noise,
}

/// Voice Activity Detector state machine.
pub struct Vad<C: Clock = SystemClock> {
    config: VadConfig,
    state: VadState,
    silence_start: Option<Instant>,
    speech_start: Option<Instant>,
    clock: C,
}

impl<C: Clock> Vad<C> {
    pub fn with_clock(config: VadConfig, clock: C) -> Self {
        Self {
            config,
            state: VadState::Idle,
            silence_start: None,
            speech_start: None,
            clock,
        }
    }

    /// Processes one block of 16-bit PCM and returns the resulting event.
    pub fn process(&mut self, samples: &[i16]) -> VadEvent {
        let is_speech = calculate_rms(samples) > self.config.speech_threshold;
        let now = self.clock.now();

        match self.state {
            VadState::Idle => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.speech_start = Some(now);
                    self.silence_start = None;
                    VadEvent::SpeechStart
                } else {
                    VadEvent::Silence
                }
            }
            VadState::Speaking => {
                if is_speech {
                    VadEvent::Speech
                } else {
                    self.state = VadState::MaybeSilence;
                    self.silence_start = Some(now);
                    VadEvent::Silence
                }
            }
            VadState::MaybeSilence => {
                if is_speech {
                    self.state = VadState::Speaking;
                    self.silence_start = None;
                    return VadEvent::Speech;
                }

                let silence_elapsed = elapsed_ms(self.silence_start, now);
                if silence_elapsed < self.config.silence_duration_ms {
                    return VadEvent::Silence;
                }

                let speech_ms = elapsed_ms(self.speech_start, now).saturating_sub(silence_elapsed);
                self.reset();
                if speech_ms >= self.config.min_speech_ms {
                    VadEvent::SpeechEnd
                } else {
                    VadEvent::Noise
                }
            }
        }
    }

    pub fn state(&self) -> VadState {
        self.state
    }

    /// Re-arms the detector for the next utterance.
    pub fn reset(&mut self) {
        self.state = VadState::Idle;
        self.silence_start = None;
        self.speech_start = None;
    }
}

impl Vad<SystemClock> {
    pub fn new(config: VadConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

fn elapsed_ms(since: Option<Instant>, now: Instant) -> u32 {
    since
        .map(|start| now.saturating_duration_since(start).as_millis() as u32)
        .unwrap_or(0)
}

/// Normalized RMS of 16-bit PCM (0.0 silence, 1.0 full scale).
pub fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f64 = samples
        .iter()
        .map(|&sample| {
            let normalized = sample as f64 / i16::MAX as f64;
            normalized * normalized
        })
        .sum();

    (sum_squares / samples.len() as f64).sqrt() as f32
}

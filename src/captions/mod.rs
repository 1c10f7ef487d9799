//! Transcript sidecar: best-effort local captions of the user's speech.
//!
//! Captions are independent of the session. A recognizer listens on its own
//! microphone handle and reports each final utterance through the
//! [`Notifier`]. Nothing it produces reaches the backend, and its failures
//! never reach the session either: [`Captions`] logs them and carries on.

#[cfg(all(feature = "whisper", feature = "cpal-audio"))]
pub mod whisper;

use crate::audio::vad::{Clock, SystemClock, Vad, VadConfig, VadEvent, VadState};
use crate::config::Config;
use crate::error::{EvaError, Result};
use crate::notify::Notifier;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Utterances are cut at this length even if the speaker never pauses.
const MAX_UTTERANCE_SECS: usize = 30;

/// A continuous recognizer producing final-only transcripts.
pub trait CaptionRecognizer: Send {
    /// Start listening; every recognised utterance goes to `notifier.caption`.
    fn start(&mut self, notifier: Arc<dyn Notifier>) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn name(&self) -> &str;
}

/// Feature-detected caption sidecar.
pub struct Captions {
    recognizer: Option<Box<dyn CaptionRecognizer>>,
    notifier: Arc<dyn Notifier>,
    running: bool,
}

impl Captions {
    /// Captions permanently off.
    pub fn unavailable(notifier: Arc<dyn Notifier>) -> Self {
        Self {
            recognizer: None,
            notifier,
            running: false,
        }
    }

    pub fn with_recognizer(recognizer: Box<dyn CaptionRecognizer>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            recognizer: Some(recognizer),
            notifier,
            running: false,
        }
    }

    /// Build the best recognizer this build and configuration support.
    ///
    /// Falls back to [`Captions::unavailable`] when captions are disabled, the
    /// binary lacks a recognizer, or the recognizer fails to initialise.
    pub fn detect(config: &Config, notifier: Arc<dyn Notifier>) -> Self {
        if !config.captions.enabled {
            tracing::debug!("captions disabled in config");
            return Self::unavailable(notifier);
        }
        match build_recognizer(config) {
            Ok(recognizer) => {
                tracing::info!(recognizer = recognizer.name(), "captions available");
                Self::with_recognizer(recognizer, notifier)
            }
            Err(e) => {
                tracing::info!("captions unavailable: {}", e);
                Self::unavailable(notifier)
            }
        }
    }

    pub fn is_available(&self) -> bool {
        self.recognizer.is_some()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start listening. Failures are logged, never returned.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        let Some(recognizer) = self.recognizer.as_mut() else {
            return;
        };
        match recognizer.start(Arc::clone(&self.notifier)) {
            Ok(()) => {
                self.running = true;
                tracing::debug!("captions started");
            }
            Err(e) => tracing::warn!("captions failed to start: {}", e),
        }
    }

    /// Stop listening. Failures are logged, never returned.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        if let Some(recognizer) = self.recognizer.as_mut()
            && let Err(e) = recognizer.stop()
        {
            tracing::debug!("captions failed to stop: {}", e);
        }
    }
}

#[cfg(all(feature = "whisper", feature = "cpal-audio"))]
fn build_recognizer(config: &Config) -> Result<Box<dyn CaptionRecognizer>> {
    Ok(Box::new(whisper::WhisperCaptions::new(config)?))
}

#[cfg(not(all(feature = "whisper", feature = "cpal-audio")))]
fn build_recognizer(_config: &Config) -> Result<Box<dyn CaptionRecognizer>> {
    Err(EvaError::Captions {
        message: "built without the whisper and cpal-audio features".to_string(),
    })
}

/// Cuts a continuous sample stream into utterances with a [`Vad`].
pub struct UtteranceSegmenter<C: Clock = SystemClock> {
    vad: Vad<C>,
    buffer: Vec<i16>,
    max_samples: usize,
}

impl UtteranceSegmenter<SystemClock> {
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        Self::with_clock(config, sample_rate, SystemClock)
    }
}

impl<C: Clock> UtteranceSegmenter<C> {
    pub fn with_clock(config: VadConfig, sample_rate: u32, clock: C) -> Self {
        Self {
            vad: Vad::with_clock(config, clock),
            buffer: Vec::new(),
            max_samples: sample_rate as usize * MAX_UTTERANCE_SECS,
        }
    }

    /// Feed one block; returns a finished utterance, if this block ended one.
    pub fn push(&mut self, samples: &[i16]) -> Option<Vec<i16>> {
        match self.vad.process(samples) {
            VadEvent::SpeechStart => {
                self.buffer.clear();
                self.buffer.extend_from_slice(samples);
            }
            VadEvent::Speech => self.buffer.extend_from_slice(samples),
            VadEvent::Silence => {
                if self.vad.state() != VadState::Idle {
                    self.buffer.extend_from_slice(samples);
                }
            }
            VadEvent::SpeechEnd => {
                self.buffer.extend_from_slice(samples);
                return Some(std::mem::take(&mut self.buffer));
            }
            VadEvent::Noise => self.buffer.clear(),
        }

        if self.buffer.len() >= self.max_samples {
            self.vad.reset();
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }

    pub fn reset(&mut self) {
        self.vad.reset();
        self.buffer.clear();
    }
}

// ---------------------------------------------------------------------------
// Mock recognizer
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MockRecognizerState {
    notifier: Option<Arc<dyn Notifier>>,
    fail_start: bool,
    fail_stop: bool,
}

/// Observes a [`MockRecognizer`] after it has been handed to [`Captions`].
#[derive(Clone, Default)]
pub struct MockRecognizerProbe {
    state: Arc<Mutex<MockRecognizerState>>,
    start_calls: Arc<AtomicUsize>,
    stop_calls: Arc<AtomicUsize>,
    listening: Arc<AtomicBool>,
}

impl MockRecognizerProbe {
    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    /// Pretend `text` was recognised. Dropped unless listening.
    pub fn recognise(&self, text: &str) -> bool {
        if !self.is_listening() {
            return false;
        }
        let notifier = self.state.lock().ok().and_then(|s| s.notifier.clone());
        match notifier {
            Some(notifier) => {
                notifier.caption(text);
                true
            }
            None => false,
        }
    }
}

/// Scripted recognizer for tests.
#[derive(Clone, Default)]
pub struct MockRecognizer {
    probe: MockRecognizerProbe,
}

impl MockRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_start_failure(self) -> Self {
        if let Ok(mut state) = self.probe.state.lock() {
            state.fail_start = true;
        }
        self
    }

    pub fn with_stop_failure(self) -> Self {
        if let Ok(mut state) = self.probe.state.lock() {
            state.fail_stop = true;
        }
        self
    }

    pub fn probe(&self) -> MockRecognizerProbe {
        self.probe.clone()
    }
}

impl CaptionRecognizer for MockRecognizer {
    fn start(&mut self, notifier: Arc<dyn Notifier>) -> Result<()> {
        self.probe.start_calls.fetch_add(1, Ordering::SeqCst);
        let mut state = self
            .probe
            .state
            .lock()
            .map_err(|e| EvaError::Captions {
                message: e.to_string(),
            })?;
        if state.fail_start {
            return Err(EvaError::Captions {
                message: "mock recognizer start failure".to_string(),
            });
        }
        state.notifier = Some(notifier);
        self.probe.listening.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.probe.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.probe.listening.store(false, Ordering::SeqCst);
        let fail = self.probe.state.lock().map(|s| s.fail_stop).unwrap_or(false);
        if fail {
            return Err(EvaError::Captions {
                message: "mock recognizer stop failure".to_string(),
            });
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::vad::MockClock;
    use crate::notify::{CollectingNotifier, NotificationLevel};
    use std::time::Duration;

    fn captions(recognizer: MockRecognizer) -> (Captions, CollectingNotifier) {
        let notifier = CollectingNotifier::new();
        let captions = Captions::with_recognizer(Box::new(recognizer), Arc::new(notifier.clone()));
        (captions, notifier)
    }

    #[test]
    fn recognised_utterances_become_caption_notifications() {
        let recognizer = MockRecognizer::new();
        let probe = recognizer.probe();
        let (mut captions, notifier) = captions(recognizer);

        assert!(!probe.recognise("antes"));
        captions.start();
        assert!(probe.recognise("bom dia"));
        captions.stop();
        assert!(!probe.recognise("depois"));

        assert_eq!(notifier.of_level(NotificationLevel::Caption), vec!["bom dia"]);
    }

    #[test]
    fn start_failure_is_contained() {
        let recognizer = MockRecognizer::new().with_start_failure();
        let probe = recognizer.probe();
        let (mut captions, notifier) = captions(recognizer);

        captions.start();
        assert!(!captions.is_running());
        assert_eq!(probe.start_calls(), 1);
        // stop without a successful start never reaches the recognizer
        captions.stop();
        assert_eq!(probe.stop_calls(), 0);
        assert!(notifier.all().is_empty());
    }

    #[test]
    fn stop_failure_is_contained_and_repeat_calls_are_noops() {
        let recognizer = MockRecognizer::new().with_stop_failure();
        let probe = recognizer.probe();
        let (mut captions, _) = captions(recognizer);

        captions.start();
        captions.start();
        captions.stop();
        captions.stop();

        assert_eq!(probe.start_calls(), 1);
        assert_eq!(probe.stop_calls(), 1);
        assert!(!captions.is_running());
    }

    #[test]
    fn unavailable_captions_do_nothing() {
        let mut captions = Captions::unavailable(Arc::new(CollectingNotifier::new()));
        captions.start();
        assert!(!captions.is_available());
        assert!(!captions.is_running());
        captions.stop();
    }

    #[test]
    fn detect_respects_disabled_config() {
        let mut config = Config::default();
        config.captions.enabled = false;
        let captions = Captions::detect(&config, Arc::new(CollectingNotifier::new()));
        assert!(!captions.is_available());
    }

    fn segmenter() -> (UtteranceSegmenter<MockClock>, MockClock) {
        let clock = MockClock::new();
        let config = VadConfig {
            speech_threshold: 0.02,
            silence_duration_ms: 800,
            min_speech_ms: 300,
        };
        (UtteranceSegmenter::with_clock(config, 16000, clock.clone()), clock)
    }

    #[test]
    fn segmenter_emits_utterance_after_trailing_silence() {
        let (mut segmenter, clock) = segmenter();
        let loud = vec![10000i16; 1600];
        let quiet = vec![0i16; 1600];

        assert!(segmenter.push(&quiet).is_none());
        for _ in 0..5 {
            assert!(segmenter.push(&loud).is_none());
            clock.advance(Duration::from_millis(100));
        }
        assert!(segmenter.push(&quiet).is_none());
        clock.advance(Duration::from_millis(900));
        let utterance = segmenter.push(&quiet).unwrap();

        assert_eq!(utterance.len(), 7 * 1600);
        assert!(segmenter.push(&quiet).is_none());
    }

    #[test]
    fn segmenter_drops_short_noise() {
        let (mut segmenter, clock) = segmenter();
        let loud = vec![10000i16; 160];
        let quiet = vec![0i16; 160];

        assert!(segmenter.push(&loud).is_none());
        clock.advance(Duration::from_millis(50));
        assert!(segmenter.push(&quiet).is_none());
        clock.advance(Duration::from_millis(900));
        assert!(segmenter.push(&quiet).is_none());
    }

    #[test]
    fn segmenter_cuts_very_long_speech() {
        let (mut segmenter, _) = segmenter();
        let loud = vec![10000i16; 16000];

        let mut emitted = None;
        for _ in 0..MAX_UTTERANCE_SECS {
            emitted = segmenter.push(&loud);
        }
        assert_eq!(emitted.map(|u| u.len()), Some(16000 * MAX_UTTERANCE_SECS));
    }
}

use crate::defaults;
use crate::error::{EvaError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Trait for microphone sources.
///
/// This trait allows swapping implementations (real audio device vs mock).
pub trait AudioSource: Send + Sync {
    /// Acquire the device and start capturing.
    fn start(&mut self) -> Result<()>;

    /// Stop capturing and release the device.
    fn stop(&mut self) -> Result<()>;

    /// Drain the samples captured since the last read (16-bit PCM, mono, input rate).
    fn read_samples(&mut self) -> Result<Vec<i16>>;
}

/// Configuration for audio source initialization
#[derive(Debug, Clone)]
pub struct AudioSourceConfig {
    pub sample_rate: u32,
    pub device: Option<String>,
}

impl Default for AudioSourceConfig {
    fn default() -> Self {
        Self {
            sample_rate: defaults::INPUT_SAMPLE_RATE,
            device: None,
        }
    }
}

/// Observes a [`MockAudioSource`] after it has been boxed and handed away.
#[derive(Debug, Clone, Default)]
pub struct MockAudioProbe {
    started: Arc<AtomicBool>,
    start_calls: Arc<AtomicUsize>,
    stop_calls: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
}

impl MockAudioProbe {
    /// True while the mock microphone is held.
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

/// Mock audio source for testing
#[derive(Debug, Clone)]
pub struct MockAudioSource {
    samples: Vec<i16>,
    should_fail_start: bool,
    should_fail_stop: bool,
    should_fail_read: bool,
    error_message: String,
    probe: MockAudioProbe,
}

impl MockAudioSource {
    /// Create a new mock audio source with default settings
    pub fn new() -> Self {
        Self {
            samples: vec![0i16; 160],
            should_fail_start: false,
            should_fail_stop: false,
            should_fail_read: false,
            error_message: "mock audio error".to_string(),
            probe: MockAudioProbe::default(),
        }
    }

    /// Configure the mock to return specific samples on every read
    pub fn with_samples(mut self, samples: Vec<i16>) -> Self {
        self.samples = samples;
        self
    }

    /// Configure the mock to fail on start (permission denied, no device)
    pub fn with_start_failure(mut self) -> Self {
        self.should_fail_start = true;
        self
    }

    pub fn with_stop_failure(mut self) -> Self {
        self.should_fail_stop = true;
        self
    }

    pub fn with_read_failure(mut self) -> Self {
        self.should_fail_read = true;
        self
    }

    /// Configure the error message for failures
    pub fn with_error_message(mut self, message: &str) -> Self {
        self.error_message = message.to_string();
        self
    }

    /// Handle that keeps reporting state after the mock is moved.
    pub fn probe(&self) -> MockAudioProbe {
        self.probe.clone()
    }

    pub fn is_started(&self) -> bool {
        self.probe.is_started()
    }
}

impl Default for MockAudioSource {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSource for MockAudioSource {
    fn start(&mut self) -> Result<()> {
        self.probe.start_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_start {
            return Err(EvaError::HardwareAccess {
                message: self.error_message.clone(),
            });
        }
        self.probe.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.probe.stop_calls.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_stop {
            return Err(EvaError::HardwareAccess {
                message: self.error_message.clone(),
            });
        }
        self.probe.started.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        self.probe.reads.fetch_add(1, Ordering::SeqCst);
        if self.should_fail_read {
            return Err(EvaError::HardwareAccess {
                message: self.error_message.clone(),
            });
        }
        Ok(self.samples.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_audio_source_returns_configured_samples() {
        let test_samples = vec![100i16, 200, 300, 400, 500];
        let mut source = MockAudioSource::new().with_samples(test_samples.clone());

        let result = source.read_samples();

        assert_eq!(result.unwrap(), test_samples);
    }

    #[test]
    fn test_mock_audio_source_returns_default_samples() {
        let mut source = MockAudioSource::new();

        let samples = source.read_samples().unwrap();
        assert_eq!(samples.len(), 160);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_mock_audio_source_read_error() {
        let mut source = MockAudioSource::new()
            .with_read_failure()
            .with_error_message("buffer overflow");

        match source.read_samples() {
            Err(EvaError::HardwareAccess { message }) => assert_eq!(message, "buffer overflow"),
            other => panic!("Expected HardwareAccess error, got {:?}", other),
        }
    }

    #[test]
    fn test_mock_audio_source_start_stop_state_management() {
        let mut source = MockAudioSource::new();
        assert!(!source.is_started());

        source.start().unwrap();
        assert!(source.is_started());

        source.stop().unwrap();
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_audio_source_start_failure_is_hardware_access() {
        let mut source = MockAudioSource::new()
            .with_start_failure()
            .with_error_message("permission denied");

        match source.start() {
            Err(EvaError::HardwareAccess { message }) => assert_eq!(message, "permission denied"),
            other => panic!("Expected HardwareAccess error, got {:?}", other),
        }
        assert!(!source.is_started());
    }

    #[test]
    fn test_mock_audio_source_stop_failure_keeps_started() {
        let mut source = MockAudioSource::new().with_stop_failure();
        source.start().unwrap();

        assert!(source.stop().is_err());
        assert!(source.is_started());
    }

    #[test]
    fn test_probe_observes_boxed_source() {
        let mock = MockAudioSource::new().with_samples(vec![1i16, 2, 3]);
        let probe = mock.probe();
        let mut boxed: Box<dyn AudioSource> = Box::new(mock);

        boxed.start().unwrap();
        assert!(probe.is_started());
        assert_eq!(boxed.read_samples().unwrap(), vec![1, 2, 3]);
        boxed.stop().unwrap();

        assert!(!probe.is_started());
        assert_eq!(probe.start_calls(), 1);
        assert_eq!(probe.stop_calls(), 1);
        assert_eq!(probe.reads(), 1);
    }

    #[test]
    fn test_mock_audio_source_start_stop_multiple_times() {
        let mut source = MockAudioSource::new();
        for _ in 0..3 {
            assert!(source.start().is_ok());
            assert!(source.is_started());
            assert!(source.stop().is_ok());
            assert!(!source.is_started());
        }
        assert_eq!(source.probe().start_calls(), 3);
    }

    #[test]
    fn test_audio_source_config_default() {
        let config = AudioSourceConfig::default();
        assert_eq!(config.sample_rate, 16000);
        assert!(config.device.is_none());
    }
}

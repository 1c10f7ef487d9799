//! Whisper-backed caption recognizer.
//!
//! Opens its own microphone stream, segments it with a VAD and transcribes each
//! utterance locally. Runs on a dedicated thread; inference never blocks the
//! session.

use super::{CaptionRecognizer, UtteranceSegmenter};
use crate::audio::capture::CpalAudioSource;
use crate::audio::recorder::{AudioSource, AudioSourceConfig};
use crate::audio::vad::VadConfig;
use crate::config::Config;
use crate::defaults;
use crate::error::{EvaError, Result};
use crate::notify::Notifier;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

static LOGGING_HOOKS_INSTALLED: Once = Once::new();

pub struct WhisperCaptions {
    context: Arc<Mutex<WhisperContext>>,
    language: String,
    vad: VadConfig,
    source_config: AudioSourceConfig,
    poll_interval: Duration,
    /// Cleared to retire the listener thread of the current run.
    listening: Option<Arc<AtomicBool>>,
    model_name: String,
}

impl WhisperCaptions {
    /// Load the ggml model named by `captions.model_path`.
    ///
    /// # Errors
    /// Returns `EvaError::Captions` if no model is configured or it fails to load.
    pub fn new(config: &Config) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        let model_path: PathBuf =
            config
                .captions
                .model_path
                .clone()
                .ok_or_else(|| EvaError::Captions {
                    message: "no captions.model_path configured".to_string(),
                })?;
        if !model_path.exists() {
            return Err(EvaError::Captions {
                message: format!("model not found: {}", model_path.display()),
            });
        }

        let model_name = model_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string();

        let context = WhisperContext::new_with_params(
            model_path.to_str().ok_or_else(|| EvaError::Captions {
                message: "Invalid UTF-8 in model path".to_string(),
            })?,
            WhisperContextParameters::default(),
        )
        .map_err(|e| EvaError::Captions {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        Ok(Self {
            context: Arc::new(Mutex::new(context)),
            language: config.captions.language.clone(),
            vad: VadConfig {
                speech_threshold: config.captions.speech_threshold,
                silence_duration_ms: config.captions.silence_duration_ms,
                min_speech_ms: defaults::CAPTION_MIN_SPEECH_MS,
            },
            source_config: AudioSourceConfig {
                sample_rate: defaults::INPUT_SAMPLE_RATE,
                device: config.audio.input_device.clone(),
            },
            poll_interval: Duration::from_millis(config.audio.poll_interval_ms),
            listening: None,
            model_name,
        })
    }
}

fn transcribe(context: &Mutex<WhisperContext>, language: &str, audio: &[i16]) -> Result<String> {
    let audio_f32: Vec<f32> = audio.iter().map(|&s| s as f32 / 32768.0).collect();

    let context = context.lock().map_err(|e| EvaError::Captions {
        message: format!("Failed to acquire context lock: {}", e),
    })?;
    let mut state = context.create_state().map_err(|e| EvaError::Captions {
        message: format!("Failed to create Whisper state: {}", e),
    })?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    params.set_language(Some(language));
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    state.full(params, &audio_f32).map_err(|e| EvaError::Captions {
        message: format!("Whisper inference failed: {}", e),
    })?;

    let mut text = String::new();
    for segment in state.as_iter() {
        text.push_str(&segment.to_string());
    }
    Ok(text.trim().to_string())
}

impl CaptionRecognizer for WhisperCaptions {
    fn start(&mut self, notifier: Arc<dyn Notifier>) -> Result<()> {
        if self.listening.is_some() {
            return Ok(());
        }

        let mut source = CpalAudioSource::new(&self.source_config).map_err(|e| EvaError::Captions {
            message: e.to_string(),
        })?;
        source.start().map_err(|e| EvaError::Captions {
            message: e.to_string(),
        })?;

        let listening = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&listening);
        let context = Arc::clone(&self.context);
        let language = self.language.clone();
        let mut segmenter = UtteranceSegmenter::new(self.vad, defaults::INPUT_SAMPLE_RATE);
        let poll_interval = self.poll_interval;

        std::thread::Builder::new()
            .name("eva-captions".to_string())
            .spawn(move || {
                while flag.load(Ordering::SeqCst) {
                    match source.read_samples() {
                        Ok(samples) if !samples.is_empty() => {
                            if let Some(utterance) = segmenter.push(&samples) {
                                match transcribe(&context, &language, &utterance) {
                                    Ok(text) if !text.is_empty() && flag.load(Ordering::SeqCst) => {
                                        notifier.caption(&text);
                                    }
                                    Ok(_) => {}
                                    Err(e) => tracing::debug!("caption transcription failed: {}", e),
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(e) => tracing::debug!("caption microphone read failed: {}", e),
                    }
                    std::thread::sleep(poll_interval);
                }
                if let Err(e) = source.stop() {
                    tracing::debug!("caption microphone stop failed: {}", e);
                }
                tracing::trace!("caption thread exiting");
            })
            .map_err(|e| EvaError::Captions {
                message: format!("failed to spawn caption thread: {}", e),
            })?;

        self.listening = Some(listening);
        Ok(())
    }

    /// Retire the listener thread; it releases its microphone once any
    /// in-flight inference returns.
    fn stop(&mut self) -> Result<()> {
        if let Some(listening) = self.listening.take() {
            listening.store(false, Ordering::SeqCst);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

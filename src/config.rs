use crate::defaults;
use crate::error::{EvaError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub live: LiveConfig,
    pub audio: AudioConfig,
    pub captions: CaptionsConfig,
    pub store: StoreConfig,
}

/// Streaming backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub api_key: Option<String>,
    pub handshake_timeout_ms: u64,
    /// Ask the assistant to greet the user right after the handshake
    pub greeting: bool,
}

/// Audio hardware configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub chunk_samples: usize,
    pub gain: f32,
    pub poll_interval_ms: u64,
}

/// Local caption sidecar configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CaptionsConfig {
    pub enabled: bool,
    pub language: String,
    pub model_path: Option<PathBuf>,
    pub speech_threshold: f32,
    pub silence_duration_ms: u32,
}

/// Application state store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct StoreConfig {
    /// JSON file holding clients, alerts and appointments (None = in-memory)
    pub path: Option<PathBuf>,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::DEFAULT_ENDPOINT.to_string(),
            model: defaults::DEFAULT_MODEL.to_string(),
            voice: defaults::DEFAULT_VOICE.to_string(),
            api_key: None,
            handshake_timeout_ms: defaults::HANDSHAKE_TIMEOUT_MS,
            greeting: true,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            chunk_samples: defaults::CHUNK_SAMPLES,
            gain: defaults::OUTPUT_GAIN,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
        }
    }
}

impl Default for CaptionsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            language: defaults::CAPTION_LANGUAGE.to_string(),
            model_path: None,
            speech_threshold: defaults::CAPTION_SPEECH_THRESHOLD,
            silence_duration_ms: defaults::CAPTION_SILENCE_MS,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Returns an error if the file cannot be read or contains invalid TOML.
    /// Missing fields will use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file or return defaults if the file doesn't exist
    ///
    /// Only a missing file falls back to defaults; invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(EvaError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Ok(Self::default())
            }
            Err(e) => Err(EvaError::ConfigParse {
                message: format!("{}: {}", path.display(), e),
            }),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - EVA_API_KEY (falls back to GOOGLE_API_KEY) → live.api_key
    /// - EVA_MODEL → live.model
    /// - EVA_VOICE → live.voice
    /// - EVA_AUDIO_DEVICE → audio.input_device
    pub fn with_env_overrides(mut self) -> Self {
        let api_key = std::env::var("EVA_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok().filter(|k| !k.is_empty()));
        if let Some(key) = api_key {
            self.live.api_key = Some(key);
        }

        if let Ok(model) = std::env::var("EVA_MODEL")
            && !model.is_empty()
        {
            self.live.model = model;
        }

        if let Ok(voice) = std::env::var("EVA_VOICE")
            && !voice.is_empty()
        {
            self.live.voice = voice;
        }

        if let Ok(device) = std::env::var("EVA_AUDIO_DEVICE")
            && !device.is_empty()
        {
            self.audio.input_device = Some(device);
        }

        self
    }

    /// Reject values that would make a session unusable.
    pub fn validate(&self) -> Result<()> {
        if self.live.model.trim().is_empty() {
            return Err(EvaError::ConfigInvalidValue {
                key: "live.model".to_string(),
                message: "must not be empty".to_string(),
            });
        }
        if self.audio.chunk_samples == 0 {
            return Err(EvaError::ConfigInvalidValue {
                key: "audio.chunk_samples".to_string(),
                message: "must be positive".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.audio.gain) {
            return Err(EvaError::ConfigInvalidValue {
                key: "audio.gain".to_string(),
                message: format!("must be between 0.0 and 1.0, got {}", self.audio.gain),
            });
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/eva-voice/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("eva-voice")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_eva_env() {
        remove_env("EVA_API_KEY");
        remove_env("GOOGLE_API_KEY");
        remove_env("EVA_MODEL");
        remove_env("EVA_VOICE");
        remove_env("EVA_AUDIO_DEVICE");
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.live.model, defaults::DEFAULT_MODEL);
        assert_eq!(config.live.voice, "Aoede");
        assert_eq!(config.live.api_key, None);
        assert!(config.live.greeting);

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.chunk_samples, 1600);
        assert_eq!(config.audio.gain, 1.0);

        assert!(config.captions.enabled);
        assert_eq!(config.captions.language, "pt");
        assert_eq!(config.captions.model_path, None);

        assert_eq!(config.store.path, None);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [live]
            model = "custom-model"
            voice = "Kore"
            handshake_timeout_ms = 2500
            greeting = false

            [audio]
            input_device = "pipewire"
            chunk_samples = 800
            gain = 0.5

            [captions]
            enabled = false
            model_path = "/models/ggml-small.bin"

            [store]
            path = "/var/lib/eva/state.json"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.live.model, "custom-model");
        assert_eq!(config.live.voice, "Kore");
        assert_eq!(config.live.handshake_timeout_ms, 2500);
        assert!(!config.live.greeting);
        assert_eq!(config.audio.input_device, Some("pipewire".to_string()));
        assert_eq!(config.audio.chunk_samples, 800);
        assert_eq!(config.audio.gain, 0.5);
        assert!(!config.captions.enabled);
        assert_eq!(
            config.captions.model_path,
            Some(PathBuf::from("/models/ggml-small.bin"))
        );
        assert_eq!(
            config.store.path,
            Some(PathBuf::from("/var/lib/eva/state.json"))
        );
    }

    #[test]
    fn test_load_partial_config_uses_defaults() {
        let toml_content = r#"
            [live]
            voice = "Puck"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.live.voice, "Puck");
        assert_eq!(config.live.model, defaults::DEFAULT_MODEL);
        assert_eq!(config.audio, AudioConfig::default());
        assert_eq!(config.captions, CaptionsConfig::default());
    }

    #[test]
    fn test_env_override_api_key_prefers_eva_key() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_eva_env();

        set_env("GOOGLE_API_KEY", "google-key");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.live.api_key.as_deref(), Some("google-key"));

        set_env("EVA_API_KEY", "eva-key");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.live.api_key.as_deref(), Some("eva-key"));

        clear_eva_env();
    }

    #[test]
    fn test_env_override_model_voice_device() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_eva_env();

        set_env("EVA_MODEL", "other-model");
        set_env("EVA_VOICE", "Charon");
        set_env("EVA_AUDIO_DEVICE", "hw:1,0");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.live.model, "other-model");
        assert_eq!(config.live.voice, "Charon");
        assert_eq!(config.audio.input_device, Some("hw:1,0".to_string()));

        clear_eva_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_eva_env();

        set_env("EVA_MODEL", "");
        set_env("EVA_API_KEY", "");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.live.model, defaults::DEFAULT_MODEL);
        assert_eq!(config.live.api_key, None);

        clear_eva_env();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [live
            model = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        assert!(Config::load(temp_file.path()).is_err());
        assert!(matches!(
            Config::load_or_default(temp_file.path()),
            Err(EvaError::ConfigParse { .. })
        ));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_eva_voice_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_accepts_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.audio.chunk_samples = 0;
        assert!(matches!(
            config.validate(),
            Err(EvaError::ConfigInvalidValue { key, .. }) if key == "audio.chunk_samples"
        ));

        let mut config = Config::default();
        config.audio.gain = 1.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.live.model = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_default_path_ends_with_config_toml() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();
        assert!(path_str.contains("eva-voice"));
        assert!(path_str.ends_with("config.toml"));
    }
}

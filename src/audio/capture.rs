//! Microphone capture and device discovery using CPAL.

use crate::audio::pcm;
use crate::audio::recorder::{AudioSource, AudioSourceConfig};
use crate::error::{EvaError, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Run a closure with stderr temporarily redirected to /dev/null.
///
/// CPAL probing ALSA/JACK backends prints harmless noise to fd 2.
///
/// # Safety
/// Uses `libc::dup`/`libc::dup2` to save and restore file descriptor 2.
/// Safe as long as no other thread is concurrently manipulating fd 2.
pub(crate) fn with_suppressed_stderr<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    unsafe {
        let saved_fd = libc::dup(2);
        let devnull = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
        if saved_fd >= 0 && devnull >= 0 {
            libc::dup2(devnull, 2);
            libc::close(devnull);
        }

        let result = f();

        if saved_fd >= 0 {
            libc::dup2(saved_fd, 2);
            libc::close(saved_fd);
        }

        result
    }
}

/// Preferred device names for PipeWire/PulseAudio desktops.
const PREFERRED_DEVICES: &[&str] = &["pipewire", "pulse", "PulseAudio"];

/// Device name patterns that are never useful for a voice conversation.
const FILTERED_PATTERNS: &[&str] = &[
    "surround",
    "front:",
    "rear:",
    "center:",
    "side:",
    "Digital Output",
    "S/PDIF",
];

fn should_filter_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    FILTERED_PATTERNS
        .iter()
        .any(|pattern| lower.contains(&pattern.to_lowercase()))
}

pub(crate) fn is_preferred_device(name: &str) -> bool {
    let lower = name.to_lowercase();
    PREFERRED_DEVICES
        .iter()
        .any(|pref| lower.contains(&pref.to_lowercase()))
}

/// Which side of the audio graph a device listing is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Input,
    Output,
}

/// List usable devices, marking preferred ones with "\[recommended\]".
///
/// # Errors
/// Returns `EvaError::HardwareAccess` if device enumeration fails.
pub fn list_devices(kind: DeviceKind) -> Result<Vec<String>> {
    let devices = with_suppressed_stderr(|| {
        let host = cpal::default_host();
        match kind {
            DeviceKind::Input => host.input_devices(),
            DeviceKind::Output => host.output_devices(),
        }
    });
    let devices = devices.map_err(|e| EvaError::HardwareAccess {
        message: format!("Failed to enumerate {:?} devices: {}", kind, e),
    })?;

    let mut device_names = Vec::new();
    for device in devices {
        if let Ok(name) = device.name() {
            if should_filter_device(&name) {
                continue;
            }
            if is_preferred_device(&name) {
                device_names.push(format!("{} [recommended]", name));
            } else {
                device_names.push(name);
            }
        }
    }

    Ok(device_names)
}

/// Resolve a device by exact name, or the best default for `kind`.
///
/// # Errors
/// Returns `EvaError::AudioDeviceNotFound` if no matching device exists.
pub(crate) fn find_device(kind: DeviceKind, device_name: Option<&str>) -> Result<cpal::Device> {
    with_suppressed_stderr(|| {
        let host = cpal::default_host();
        let devices = match kind {
            DeviceKind::Input => host.input_devices(),
            DeviceKind::Output => host.output_devices(),
        };

        if let Some(name) = device_name {
            let devices = devices.map_err(|e| EvaError::HardwareAccess {
                message: format!("Failed to enumerate devices: {}", e),
            })?;
            for dev in devices {
                if let Ok(dev_name) = dev.name()
                    && dev_name == name
                {
                    return Ok(dev);
                }
            }
            return Err(EvaError::AudioDeviceNotFound {
                device: name.to_string(),
            });
        }

        if let Ok(devices) = devices {
            for device in devices {
                if let Ok(name) = device.name()
                    && is_preferred_device(&name)
                {
                    return Ok(device);
                }
            }
        }

        let fallback = match kind {
            DeviceKind::Input => host.default_input_device(),
            DeviceKind::Output => host.default_output_device(),
        };
        fallback.ok_or_else(|| EvaError::AudioDeviceNotFound {
            device: "default".to_string(),
        })
    })
}

/// Wrapper for cpal::Stream to make it Send.
///
/// SAFETY: the stream is only touched through the owning Mutex, one thread at a time.
pub(crate) struct SendableStream(pub(crate) cpal::Stream);

unsafe impl Send for SendableStream {}

/// Microphone capture at 16 kHz mono i16.
///
/// Tries i16 at the input rate first, then f32, then the device's native config
/// with software mixing and resampling.
pub struct CpalAudioSource {
    device: cpal::Device,
    stream: Arc<Mutex<Option<SendableStream>>>,
    buffer: Arc<Mutex<Vec<i16>>>,
    callback_count: Arc<AtomicU64>,
    sample_rate: u32,
}

impl CpalAudioSource {
    /// Create a source on the named device, or the best default.
    ///
    /// The device is resolved here; it is not opened until `start`.
    pub fn new(config: &AudioSourceConfig) -> Result<Self> {
        let device = find_device(DeviceKind::Input, config.device.as_deref())?;
        if let Ok(name) = device.name() {
            tracing::debug!(device = %name, "selected input device");
        }

        Ok(Self {
            device,
            stream: Arc::new(Mutex::new(None)),
            buffer: Arc::new(Mutex::new(Vec::new())),
            callback_count: Arc::new(AtomicU64::new(0)),
            sample_rate: config.sample_rate,
        })
    }

    fn build_stream(&self) -> Result<cpal::Stream> {
        let preferred_config = cpal::StreamConfig {
            channels: 1,
            sample_rate: cpal::SampleRate(self.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let err_callback = |err| {
            tracing::warn!("input stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(data);
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);
        if let Ok(stream) = self.device.build_input_stream(
            &preferred_config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                counter.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend(pcm::f32_to_i16(data));
                }
            },
            err_callback,
            None,
        ) {
            return Ok(stream);
        }

        self.build_stream_native()
    }

    /// Stream at the device's native config, mixed to mono and resampled in software.
    fn build_stream_native(&self) -> Result<cpal::Stream> {
        use cpal::SampleFormat;

        let default_config =
            self.device
                .default_input_config()
                .map_err(|e| EvaError::HardwareAccess {
                    message: format!("Failed to query default input config: {}", e),
                })?;

        let native_rate = default_config.sample_rate().0;
        let native_channels = default_config.channels() as usize;
        let target_rate = self.sample_rate;
        let stream_config: cpal::StreamConfig = default_config.clone().into();

        tracing::info!(
            channels = native_channels,
            rate = native_rate,
            format = ?default_config.sample_format(),
            "using native input format, converting in software"
        );

        let err_callback = |err| {
            tracing::warn!("input stream error: {}", err);
        };

        let buffer = Arc::clone(&self.buffer);
        let counter = Arc::clone(&self.callback_count);

        match default_config.sample_format() {
            SampleFormat::I16 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let converted =
                            convert_to_mono(data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| EvaError::HardwareAccess {
                    message: format!("Failed to build native i16 stream: {}", e),
                }),
            SampleFormat::F32 => self
                .device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        counter.fetch_add(1, Ordering::Relaxed);
                        let i16_data = pcm::f32_to_i16(data);
                        let converted =
                            convert_to_mono(&i16_data, native_channels, native_rate, target_rate);
                        if let Ok(mut buf) = buffer.lock() {
                            buf.extend_from_slice(&converted);
                        }
                    },
                    err_callback,
                    None,
                )
                .map_err(|e| EvaError::HardwareAccess {
                    message: format!("Failed to build native f32 stream: {}", e),
                }),
            fmt => Err(EvaError::HardwareAccess {
                message: format!(
                    "Unsupported native sample format: {:?}. Try another input device.",
                    fmt
                ),
            }),
        }
    }
}

fn convert_to_mono(samples: &[i16], channels: usize, source_rate: u32, target_rate: u32) -> Vec<i16> {
    let mono = pcm::mix_to_mono(samples, channels);
    pcm::resample(&mono, source_rate, target_rate)
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<()> {
        {
            let stream_guard = self.stream.lock().map_err(|e| EvaError::HardwareAccess {
                message: format!("Failed to lock stream: {}", e),
            })?;
            if stream_guard.is_some() {
                return Ok(());
            }
        }

        let stream = self.build_stream()?;
        stream.play().map_err(|e| EvaError::HardwareAccess {
            message: format!("Failed to start input stream: {}", e),
        })?;

        // Some PipeWire-ALSA setups accept the config but never fire the callback.
        std::thread::sleep(std::time::Duration::from_millis(200));

        let final_stream = if self.callback_count.load(Ordering::Relaxed) == 0 {
            drop(stream);
            if let Ok(mut buf) = self.buffer.lock() {
                buf.clear();
            }
            tracing::debug!("preferred input config delivered no data, retrying native");

            let native_stream = self.build_stream_native()?;
            native_stream.play().map_err(|e| EvaError::HardwareAccess {
                message: format!("Failed to start native input stream: {}", e),
            })?;
            native_stream
        } else {
            stream
        };

        let mut stream_guard = self.stream.lock().map_err(|e| EvaError::HardwareAccess {
            message: format!("Failed to lock stream: {}", e),
        })?;
        *stream_guard = Some(SendableStream(final_stream));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let mut stream_guard = self.stream.lock().map_err(|e| EvaError::HardwareAccess {
            message: format!("Failed to lock stream: {}", e),
        })?;

        if let Some(sendable_stream) = stream_guard.take() {
            sendable_stream
                .0
                .pause()
                .map_err(|e| EvaError::HardwareAccess {
                    message: format!("Failed to stop input stream: {}", e),
                })?;
        }
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
        Ok(())
    }

    fn read_samples(&mut self) -> Result<Vec<i16>> {
        let mut buffer = self.buffer.lock().map_err(|e| EvaError::HardwareAccess {
            message: format!("Failed to lock audio buffer: {}", e),
        })?;
        Ok(std::mem::take(&mut *buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_filter_device() {
        assert!(should_filter_device("surround51"));
        assert!(should_filter_device("front:CARD=PCH"));
        assert!(should_filter_device("Digital Output S/PDIF"));
        assert!(!should_filter_device("pipewire"));
        assert!(!should_filter_device("Built-in Audio"));
    }

    #[test]
    fn test_is_preferred_device() {
        assert!(is_preferred_device("PipeWire"));
        assert!(is_preferred_device("pulse"));
        assert!(!is_preferred_device("hw:0,0"));
        assert!(!is_preferred_device("default"));
    }

    #[test]
    fn test_convert_to_mono_mixes_and_resamples() {
        let stereo_32k: Vec<i16> = vec![100, 300, 100, 300, 100, 300, 100, 300];
        let out = convert_to_mono(&stereo_32k, 2, 32000, 16000);
        assert_eq!(out, vec![200, 200]);
    }

    #[test]
    fn test_create_with_invalid_device_name() {
        let config = AudioSourceConfig {
            device: Some("NonExistentDevice12345".to_string()),
            ..Default::default()
        };
        match CpalAudioSource::new(&config) {
            Err(EvaError::AudioDeviceNotFound { device }) => {
                assert_eq!(device, "NonExistentDevice12345");
            }
            Err(EvaError::HardwareAccess { .. }) => {} // no audio host in CI
            Ok(_) => panic!("Expected device lookup to fail"),
            Err(other) => panic!("Unexpected error: {}", other),
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_list_input_devices() {
        let devices = list_devices(DeviceKind::Input).expect("Failed to list devices");
        assert!(!devices.is_empty(), "Expected at least one input device");
        for device in &devices {
            assert!(!device.to_lowercase().contains("surround"));
        }
    }

    #[test]
    #[ignore] // Requires audio hardware
    fn test_start_read_stop() {
        let mut source =
            CpalAudioSource::new(&AudioSourceConfig::default()).expect("Failed to create source");
        assert!(source.start().is_ok());
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(source.read_samples().is_ok());
        assert!(source.stop().is_ok());
    }
}

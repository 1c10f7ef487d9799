//! Output audio graph: a clock plus sample-accurate scheduling of buffers.
//!
//! The session schedules each decoded response buffer at an absolute time on
//! the graph's clock. The clock only advances while the graph is running.

use crate::audio::types::PcmBuffer;
use crate::error::{EvaError, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

/// Identifies one scheduled buffer.
pub type SourceId = u64;

/// Output side of the audio graph.
pub trait PlaybackGraph: Send {
    /// Start (or restart) the clock and output.
    fn resume(&mut self) -> Result<()>;

    /// Pause the clock and output. Scheduled sources are kept.
    fn suspend(&mut self) -> Result<()>;

    fn is_running(&self) -> bool;

    /// Seconds elapsed on the graph clock.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at graph time `start_at`.
    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId>;

    /// Stop a source immediately. Stopping a finished or unknown source is an error.
    fn stop_source(&mut self, id: SourceId) -> Result<()>;

    /// True until the source has finished or been stopped.
    fn is_playing(&self, id: SourceId) -> bool;

    /// Master output gain in [0.0, 1.0].
    fn set_gain(&mut self, gain: f32);
}

// ---------------------------------------------------------------------------
// Mixer shared between the graph and the output callback
// ---------------------------------------------------------------------------

struct Voice {
    samples: Vec<f32>,
    start_frame: u64,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Frame clock and voice table rendered by the output callback.
struct Mixer {
    voices: BTreeMap<SourceId, Voice>,
    frames_rendered: u64,
    device_rate: u32,
    gain: f32,
    running: bool,
}

impl Mixer {
    fn new(device_rate: u32, gain: f32) -> Self {
        Self {
            voices: BTreeMap::new(),
            frames_rendered: 0,
            device_rate,
            gain,
            running: false,
        }
    }

    fn current_time(&self) -> f64 {
        self.frames_rendered as f64 / self.device_rate as f64
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the clock.
    fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        if !self.running {
            out.fill(0.0);
            return;
        }

        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let t = self.frames_rendered + i as u64;
            let mut acc = 0.0f32;
            for voice in self.voices.values() {
                if t >= voice.start_frame && t < voice.end_frame() {
                    acc += voice.samples[(t - voice.start_frame) as usize];
                }
            }
            let value = (acc * self.gain).clamp(-1.0, 1.0);
            frame.fill(value);
        }

        self.frames_rendered += (out.len() / channels) as u64;
        let now = self.frames_rendered;
        self.voices.retain(|_, voice| voice.end_frame() > now);
    }
}

// ---------------------------------------------------------------------------
// CPAL implementation
// ---------------------------------------------------------------------------

#[cfg(feature = "cpal-audio")]
pub use cpal_graph::CpalPlayback;

#[cfg(feature = "cpal-audio")]
mod cpal_graph {
    use super::*;
    use crate::audio::capture::{DeviceKind, SendableStream, find_device, with_suppressed_stderr};
    use crate::audio::pcm;
    use cpal::traits::{DeviceTrait, StreamTrait};

    /// Speaker output through CPAL.
    ///
    /// The stream is opened on the first `resume`; until then the clock reads 0.
    /// Gain starts at full volume.
    pub struct CpalPlayback {
        device: cpal::Device,
        config: cpal::StreamConfig,
        sample_format: cpal::SampleFormat,
        mixer: Arc<Mutex<Mixer>>,
        stream: Mutex<Option<SendableStream>>,
        next_id: SourceId,
    }

    impl CpalPlayback {
        pub fn new(device_name: Option<&str>) -> Result<Self> {
            let device = find_device(DeviceKind::Output, device_name)?;
            let default_config = with_suppressed_stderr(|| device.default_output_config())
                .map_err(|e| EvaError::HardwareAccess {
                    message: format!("Failed to query default output config: {}", e),
                })?;
            let sample_format = default_config.sample_format();
            let config: cpal::StreamConfig = default_config.into();
            let device_rate = config.sample_rate.0;

            tracing::debug!(
                rate = device_rate,
                channels = config.channels,
                format = ?sample_format,
                "output device configured"
            );

            Ok(Self {
                device,
                config,
                sample_format,
                mixer: Arc::new(Mutex::new(Mixer::new(device_rate, 1.0))),
                stream: Mutex::new(None),
                next_id: 0,
            })
        }

        fn lock_mixer(&self) -> Result<std::sync::MutexGuard<'_, Mixer>> {
            self.mixer.lock().map_err(|e| EvaError::HardwareAccess {
                message: format!("Failed to lock mixer: {}", e),
            })
        }

        fn build_stream(&self) -> Result<cpal::Stream> {
            use cpal::SampleFormat;

            let channels = self.config.channels as usize;
            let err_callback = |err| {
                tracing::warn!("output stream error: {}", err);
            };

            let mixer = Arc::clone(&self.mixer);
            let stream = match self.sample_format {
                SampleFormat::F32 => self.device.build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        if let Ok(mut mixer) = mixer.lock() {
                            mixer.render(data, channels);
                        } else {
                            data.fill(0.0);
                        }
                    },
                    err_callback,
                    None,
                ),
                SampleFormat::I16 => {
                    let mut scratch: Vec<f32> = Vec::new();
                    self.device.build_output_stream(
                        &self.config,
                        move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                            scratch.resize(data.len(), 0.0);
                            if let Ok(mut mixer) = mixer.lock() {
                                mixer.render(&mut scratch, channels);
                            } else {
                                scratch.fill(0.0);
                            }
                            for (dst, src) in data.iter_mut().zip(pcm::f32_to_i16(&scratch)) {
                                *dst = src;
                            }
                        },
                        err_callback,
                        None,
                    )
                }
                fmt => {
                    return Err(EvaError::HardwareAccess {
                        message: format!("Unsupported output sample format: {:?}", fmt),
                    });
                }
            };

            stream.map_err(|e| EvaError::HardwareAccess {
                message: format!("Failed to build output stream: {}", e),
            })
        }
    }

    impl PlaybackGraph for CpalPlayback {
        fn resume(&mut self) -> Result<()> {
            let mut guard = self.stream.lock().map_err(|e| EvaError::HardwareAccess {
                message: format!("Failed to lock output stream: {}", e),
            })?;
            if guard.is_none() {
                *guard = Some(SendableStream(self.build_stream()?));
            }
            if let Some(stream) = guard.as_ref() {
                stream.0.play().map_err(|e| EvaError::HardwareAccess {
                    message: format!("Failed to start output stream: {}", e),
                })?;
            }
            drop(guard);

            self.lock_mixer()?.running = true;
            Ok(())
        }

        fn suspend(&mut self) -> Result<()> {
            self.lock_mixer()?.running = false;
            let guard = self.stream.lock().map_err(|e| EvaError::HardwareAccess {
                message: format!("Failed to lock output stream: {}", e),
            })?;
            if let Some(stream) = guard.as_ref() {
                stream.0.pause().map_err(|e| EvaError::HardwareAccess {
                    message: format!("Failed to pause output stream: {}", e),
                })?;
            }
            Ok(())
        }

        fn is_running(&self) -> bool {
            self.mixer.lock().map(|m| m.running).unwrap_or(false)
        }

        fn current_time(&self) -> f64 {
            self.mixer.lock().map(|m| m.current_time()).unwrap_or(0.0)
        }

        fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId> {
            let id = self.next_id;
            self.next_id += 1;

            let mut mixer = self.lock_mixer()?;
            let device_rate = mixer.device_rate;
            let samples = pcm::resample_f32(&buffer.samples, buffer.sample_rate, device_rate);
            let start_frame = (start_at.max(0.0) * device_rate as f64).round() as u64;
            mixer.voices.insert(
                id,
                Voice {
                    samples,
                    start_frame,
                },
            );
            Ok(id)
        }

        fn stop_source(&mut self, id: SourceId) -> Result<()> {
            self.lock_mixer()?
                .voices
                .remove(&id)
                .map(|_| ())
                .ok_or_else(|| EvaError::Other(format!("source {} is not playing", id)))
        }

        fn is_playing(&self, id: SourceId) -> bool {
            self.mixer
                .lock()
                .map(|m| m.voices.contains_key(&id))
                .unwrap_or(false)
        }

        fn set_gain(&mut self, gain: f32) {
            if let Ok(mut mixer) = self.mixer.lock() {
                mixer.gain = gain.clamp(0.0, 1.0);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Mock implementation
// ---------------------------------------------------------------------------

/// One scheduled buffer as seen by [`MockPlayback`].
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

impl ScheduledSource {
    pub fn end(&self) -> f64 {
        self.start_at + self.duration
    }
}

#[derive(Debug, Default)]
struct MockPlaybackState {
    now: f64,
    running: bool,
    gain: f32,
    scheduled: Vec<ScheduledSource>,
    stopped: Vec<SourceId>,
    resume_calls: usize,
    fail_resume: bool,
    fail_stop: bool,
}

/// Shared view into a [`MockPlayback`] after it has been boxed.
#[derive(Debug, Clone, Default)]
pub struct MockPlaybackProbe {
    state: Arc<Mutex<MockPlaybackState>>,
}

impl MockPlaybackProbe {
    fn with<R>(&self, f: impl FnOnce(&mut MockPlaybackState) -> R) -> R {
        match self.state.lock() {
            Ok(mut state) => f(&mut state),
            Err(poisoned) => f(&mut poisoned.into_inner()),
        }
    }

    /// Move the graph clock forward (only while running, like a real device).
    pub fn advance(&self, seconds: f64) {
        self.with(|s| {
            if s.running {
                s.now += seconds;
            }
        });
    }

    pub fn now(&self) -> f64 {
        self.with(|s| s.now)
    }

    pub fn is_running(&self) -> bool {
        self.with(|s| s.running)
    }

    pub fn scheduled(&self) -> Vec<ScheduledSource> {
        self.with(|s| s.scheduled.clone())
    }

    pub fn stopped(&self) -> Vec<SourceId> {
        self.with(|s| s.stopped.clone())
    }

    pub fn resume_calls(&self) -> usize {
        self.with(|s| s.resume_calls)
    }

    pub fn gain(&self) -> f32 {
        self.with(|s| s.gain)
    }

    /// Sources that are neither finished nor stopped at the current time.
    pub fn playing(&self) -> Vec<SourceId> {
        self.with(|s| {
            s.scheduled
                .iter()
                .filter(|src| !s.stopped.contains(&src.id) && s.now < src.end())
                .map(|src| src.id)
                .collect()
        })
    }
}

/// In-memory playback graph with a manually advanced clock.
#[derive(Debug, Default)]
pub struct MockPlayback {
    probe: MockPlaybackProbe,
}

impl MockPlayback {
    pub fn new() -> Self {
        let mock = Self::default();
        mock.probe.with(|s| s.gain = 1.0);
        mock
    }

    /// Start with the clock already at `seconds` (a long-lived context).
    pub fn with_time(self, seconds: f64) -> Self {
        self.probe.with(|s| s.now = seconds);
        self
    }

    pub fn with_resume_failure(self) -> Self {
        self.probe.with(|s| s.fail_resume = true);
        self
    }

    /// Every `stop_source` call fails (sources stay stopped regardless).
    pub fn with_stop_failure(self) -> Self {
        self.probe.with(|s| s.fail_stop = true);
        self
    }

    pub fn probe(&self) -> MockPlaybackProbe {
        self.probe.clone()
    }
}

impl PlaybackGraph for MockPlayback {
    fn resume(&mut self) -> Result<()> {
        self.probe.with(|s| {
            s.resume_calls += 1;
            if s.fail_resume {
                return Err(EvaError::HardwareAccess {
                    message: "mock output unavailable".to_string(),
                });
            }
            s.running = true;
            Ok(())
        })
    }

    fn suspend(&mut self) -> Result<()> {
        self.probe.with(|s| s.running = false);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.probe.is_running()
    }

    fn current_time(&self) -> f64 {
        self.probe.now()
    }

    fn schedule(&mut self, buffer: PcmBuffer, start_at: f64) -> Result<SourceId> {
        let duration = buffer.duration();
        Ok(self.probe.with(|s| {
            let id = s.scheduled.len() as SourceId;
            s.scheduled.push(ScheduledSource {
                id,
                start_at,
                duration,
            });
            id
        }))
    }

    fn stop_source(&mut self, id: SourceId) -> Result<()> {
        self.probe.with(|s| {
            let finished = s
                .scheduled
                .iter()
                .find(|src| src.id == id)
                .is_none_or(|src| s.now >= src.end());
            if !s.stopped.contains(&id) {
                s.stopped.push(id);
            }
            if s.fail_stop || finished {
                return Err(EvaError::Other(format!("source {} is not playing", id)));
            }
            Ok(())
        })
    }

    fn is_playing(&self, id: SourceId) -> bool {
        self.probe.playing().contains(&id)
    }

    fn set_gain(&mut self, gain: f32) {
        self.probe.with(|s| s.gain = gain.clamp(0.0, 1.0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(seconds: f64) -> PcmBuffer {
        PcmBuffer::new(vec![0.25; (seconds * 24000.0) as usize], 24000)
    }

    #[test]
    fn mixer_silent_and_frozen_while_suspended() {
        let mut mixer = Mixer::new(48000, 1.0);
        let mut out = vec![1.0f32; 96];
        mixer.render(&mut out, 2);
        assert!(out.iter().all(|&s| s == 0.0));
        assert_eq!(mixer.frames_rendered, 0);
    }

    #[test]
    fn mixer_plays_voice_at_its_start_frame() {
        let mut mixer = Mixer::new(10, 0.5);
        mixer.running = true;
        mixer.voices.insert(
            0,
            Voice {
                samples: vec![1.0, 1.0],
                start_frame: 2,
            },
        );

        let mut out = vec![0.0f32; 6];
        mixer.render(&mut out, 1);

        assert_eq!(out, vec![0.0, 0.0, 0.5, 0.5, 0.0, 0.0]);
        assert_eq!(mixer.frames_rendered, 6);
        assert!(mixer.voices.is_empty(), "finished voice should be dropped");
        assert!((mixer.current_time() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn mixer_duplicates_mono_to_all_channels() {
        let mut mixer = Mixer::new(10, 1.0);
        mixer.running = true;
        mixer.voices.insert(
            0,
            Voice {
                samples: vec![0.5],
                start_frame: 0,
            },
        );
        let mut out = vec![0.0f32; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.5, 0.5, 0.0, 0.0]);
    }

    #[test]
    fn mock_clock_only_advances_while_running() {
        let mut graph = MockPlayback::new();
        let probe = graph.probe();

        probe.advance(1.0);
        assert_eq!(graph.current_time(), 0.0);

        graph.resume().unwrap();
        probe.advance(1.0);
        assert_eq!(graph.current_time(), 1.0);
    }

    #[test]
    fn mock_tracks_playing_sources() {
        let mut graph = MockPlayback::new();
        let probe = graph.probe();
        graph.resume().unwrap();

        let a = graph.schedule(buffer(0.5), 0.0).unwrap();
        let b = graph.schedule(buffer(0.5), 0.5).unwrap();
        assert!(graph.is_playing(a));
        assert!(graph.is_playing(b));

        probe.advance(0.6);
        assert!(!graph.is_playing(a));
        assert!(graph.is_playing(b));

        graph.stop_source(b).unwrap();
        assert!(!graph.is_playing(b));
        assert!(graph.stop_source(a).is_err(), "finished source cannot be stopped");
    }

    #[test]
    fn mock_gain_is_clamped() {
        let mut graph = MockPlayback::new();
        graph.set_gain(3.0);
        assert_eq!(graph.probe().gain(), 1.0);
    }
}

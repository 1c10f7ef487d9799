//! Audio data types shared by the capture and playback sides.

use crate::audio::pcm;
use crate::defaults;

/// A fixed-size frame of microphone audio ready to be sent to the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    /// PCM samples (16-bit signed integers, mono).
    pub samples: Vec<i16>,
    /// Capture-order sequence number.
    pub sequence: u64,
}

impl AudioChunk {
    /// Creates a new audio chunk.
    pub fn new(samples: Vec<i16>, sequence: u64) -> Self {
        Self { samples, sequence }
    }

    /// Duration of the chunk in milliseconds at the input rate.
    pub fn duration_ms(&self) -> u32 {
        (defaults::duration_secs(self.samples.len(), defaults::INPUT_SAMPLE_RATE) * 1000.0).round()
            as u32
    }

    /// Base64 of the little-endian PCM bytes, as carried on the wire.
    pub fn to_base64(&self) -> String {
        pcm::encode_base64(&self.samples)
    }
}

/// Decoded response audio ready for scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Normalized samples in [-1.0, 1.0], mono.
    pub samples: Vec<f32>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
}

impl PcmBuffer {
    /// Creates a new buffer.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Playback duration in seconds.
    pub fn duration(&self) -> f64 {
        defaults::duration_secs(self.samples.len(), self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

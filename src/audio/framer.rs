//! Fixed-size framing stage between the microphone and the session send path.
//!
//! The microphone delivers sample runs of whatever size the device callback
//! produced; the backend wants a steady cadence of equally sized chunks.

use crate::audio::types::AudioChunk;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Accumulates raw samples and emits `chunk_samples`-sized chunks in capture order.
#[derive(Debug)]
pub struct Framer {
    chunk_samples: usize,
    buffer: Vec<i16>,
    next_sequence: u64,
    stopped: Arc<AtomicBool>,
}

/// Handle that tells a running [`Framer`] to stop buffering.
///
/// Once stopped, pending samples are discarded and no further chunk is emitted.
#[derive(Debug, Clone)]
pub struct FramerStop(Arc<AtomicBool>);

impl FramerStop {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl Framer {
    /// Creates a framer emitting chunks of `chunk_samples` samples (minimum 1).
    pub fn new(chunk_samples: usize) -> Self {
        let chunk_samples = chunk_samples.max(1);
        Self {
            chunk_samples,
            buffer: Vec::with_capacity(chunk_samples * 2),
            next_sequence: 0,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle used by teardown to stop internal buffering.
    pub fn stop_handle(&self) -> FramerStop {
        FramerStop(Arc::clone(&self.stopped))
    }

    /// Feed samples; returns every complete chunk now available.
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioChunk> {
        if self.stopped.load(Ordering::SeqCst) {
            self.buffer.clear();
            return Vec::new();
        }

        self.buffer.extend_from_slice(samples);

        let mut chunks = Vec::new();
        while self.buffer.len() >= self.chunk_samples {
            let rest = self.buffer.split_off(self.chunk_samples);
            let full = std::mem::replace(&mut self.buffer, rest);
            chunks.push(AudioChunk::new(full, self.next_sequence));
            self.next_sequence += 1;
        }
        chunks
    }

    /// Samples waiting for the next full chunk.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }
}

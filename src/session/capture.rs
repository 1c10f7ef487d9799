//! Capture pipeline: microphone → framer → session send path.
//!
//! A polling thread drains the [`AudioSource`], feeds the [`Framer`] and hands
//! every complete chunk to a sink. The sink runs only while the shared active
//! flag is set; the session checks the flag again when the chunk is delivered.

use crate::audio::framer::{Framer, FramerStop};
use crate::audio::recorder::AudioSource;
use crate::audio::types::AudioChunk;
use crate::error::{EvaError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// Receives framed chunks, in capture order.
pub type ChunkSink = Arc<dyn Fn(AudioChunk) + Send + Sync>;

pub struct CapturePipeline {
    source: Arc<Mutex<Box<dyn AudioSource>>>,
    acquired: bool,
    chunk_samples: usize,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    framer_stop: Option<FramerStop>,
    thread: Option<JoinHandle<()>>,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn AudioSource>, chunk_samples: usize, poll_interval: Duration) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            acquired: false,
            chunk_samples,
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            framer_stop: None,
            thread: None,
        }
    }

    /// Acquire the microphone.
    ///
    /// # Errors
    /// Returns `EvaError::HardwareAccess` (or `AudioDeviceNotFound`) if the device
    /// cannot be opened.
    pub fn acquire(&mut self) -> Result<()> {
        if self.acquired {
            return Ok(());
        }
        let mut source = self.source.lock().map_err(|e| EvaError::HardwareAccess {
            message: format!("microphone lock poisoned: {}", e),
        })?;
        source.start().map_err(|e| match e {
            EvaError::AudioDeviceNotFound { .. } | EvaError::HardwareAccess { .. } => e,
            other => EvaError::HardwareAccess {
                message: other.to_string(),
            },
        })?;
        self.acquired = true;
        tracing::debug!("microphone acquired");
        Ok(())
    }

    pub fn is_acquired(&self) -> bool {
        self.acquired
    }

    pub fn is_streaming(&self) -> bool {
        self.thread.is_some()
    }

    /// Build the framing stage and start delivering chunks to `sink`.
    pub fn start_streaming(&mut self, active: Arc<AtomicBool>, sink: ChunkSink) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }

        let mut framer = Framer::new(self.chunk_samples);
        self.framer_stop = Some(framer.stop_handle());
        self.running.store(true, Ordering::SeqCst);

        let source = Arc::clone(&self.source);
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;

        let handle = std::thread::Builder::new()
            .name("eva-capture".to_string())
            .spawn(move || {
                while running.load(Ordering::SeqCst) {
                    let samples = match source.lock() {
                        Ok(mut source) => source.read_samples(),
                        Err(_) => break,
                    };
                    match samples {
                        Ok(samples) if !samples.is_empty() => {
                            for chunk in framer.push(&samples) {
                                if !active.load(Ordering::SeqCst) {
                                    break;
                                }
                                sink(chunk);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!("microphone read failed: {}", e),
                    }
                    std::thread::sleep(poll_interval);
                }
                tracing::trace!("capture thread exiting");
            })
            .map_err(|e| EvaError::HardwareAccess {
                message: format!("failed to spawn capture thread: {}", e),
            })?;

        self.thread = Some(handle);
        Ok(())
    }

    /// Stop hardware tracks, disconnect the framing stage, and stop its buffering.
    ///
    /// Each step is guarded independently; this never fails and may be called repeatedly.
    pub fn release(&mut self) {
        if self.acquired {
            match self.source.lock() {
                Ok(mut source) => {
                    if let Err(e) = source.stop() {
                        tracing::debug!("microphone stop failed: {}", e);
                    }
                }
                Err(e) => tracing::debug!("microphone lock poisoned during release: {}", e),
            }
            self.acquired = false;
        }

        self.running.store(false, Ordering::SeqCst);
        if let Some(stop) = self.framer_stop.take() {
            stop.stop();
        }
        if let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            tracing::debug!("capture thread panicked");
        }
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.release();
    }
}

//! Playback pipeline: gapless, ordered rendering of response audio.
//!
//! Each frame is scheduled at `max(next_start_time, now)` and `next_start_time`
//! then advances by the frame's duration, so frames play in arrival order with
//! no overlap. Network jitter can still leave gaps; nothing is reordered or
//! buffered to hide them.

use crate::audio::pcm;
use crate::audio::playback::{PlaybackGraph, SourceId};
use crate::error::Result;
use std::collections::BTreeSet;

/// Where a frame landed on the graph clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledFrame {
    pub id: SourceId,
    pub start_at: f64,
    pub duration: f64,
}

pub struct PlaybackPipeline {
    graph: Box<dyn PlaybackGraph>,
    next_start_time: f64,
    live: BTreeSet<SourceId>,
}

impl PlaybackPipeline {
    pub fn new(graph: Box<dyn PlaybackGraph>) -> Self {
        Self {
            graph,
            next_start_time: 0.0,
            live: BTreeSet::new(),
        }
    }

    /// Resume the graph clock (it may have been suspended between sessions).
    pub fn resume(&mut self) -> Result<()> {
        if !self.graph.is_running() {
            self.graph.resume()?;
        }
        Ok(())
    }

    /// Start of a session: align the schedule with the graph clock.
    pub fn reset_clock(&mut self) {
        self.next_start_time = self.graph.current_time();
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.graph.set_gain(gain);
    }

    /// Decode one base64 frame and schedule it after everything queued so far.
    ///
    /// # Errors
    /// Returns `EvaError::Decode` for a malformed payload; the schedule is untouched.
    pub fn enqueue(&mut self, data: &str, sample_rate: u32) -> Result<ScheduledFrame> {
        let buffer = pcm::decode_base64_pcm(data, sample_rate)?;
        let duration = buffer.duration();

        self.prune_finished();
        let now = self.graph.current_time();
        let start_at = self.next_start_time.max(now);
        let id = self.graph.schedule(buffer, start_at)?;

        self.next_start_time = start_at + duration;
        self.live.insert(id);

        tracing::trace!(id, start_at, duration, "scheduled response frame");
        Ok(ScheduledFrame {
            id,
            start_at,
            duration,
        })
    }

    /// Force-stop every live source and clear the set. Never fails.
    pub fn stop_all(&mut self) {
        let ids = std::mem::take(&mut self.live);
        for id in ids {
            if let Err(e) = self.graph.stop_source(id) {
                tracing::trace!(id, "stop on finished source: {}", e);
            }
        }
    }

    /// The user talked over the reply: drop queued speech and restart the schedule at now.
    pub fn interrupt(&mut self) {
        let dropped = self.live.len();
        self.stop_all();
        self.reset_clock();
        tracing::debug!(dropped, "playback interrupted");
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Sources scheduled and not yet known to be finished.
    pub fn live_sources(&self) -> usize {
        self.live.len()
    }

    fn prune_finished(&mut self) {
        let graph = &self.graph;
        self.live.retain(|id| graph.is_playing(*id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::pcm::encode_base64;
    use crate::audio::playback::{MockPlayback, MockPlaybackProbe};
    use crate::error::EvaError;

    /// `seconds` of 24 kHz audio as a base64 frame.
    fn frame(seconds: f64) -> String {
        encode_base64(&vec![1000i16; (seconds * 24000.0) as usize])
    }

    fn pipeline() -> (PlaybackPipeline, MockPlaybackProbe) {
        let graph = MockPlayback::new();
        let probe = graph.probe();
        let mut pipeline = PlaybackPipeline::new(Box::new(graph));
        pipeline.resume().unwrap();
        pipeline.reset_clock();
        (pipeline, probe)
    }

    #[test]
    fn frames_are_back_to_back() {
        let (mut pipeline, _) = pipeline();

        let a = pipeline.enqueue(&frame(0.5), 24000).unwrap();
        let b = pipeline.enqueue(&frame(0.25), 24000).unwrap();
        let c = pipeline.enqueue(&frame(0.1), 24000).unwrap();

        assert_eq!(a.start_at, 0.0);
        assert!((b.start_at - 0.5).abs() < 1e-9);
        assert!((c.start_at - 0.75).abs() < 1e-9);
        assert!((pipeline.next_start_time() - 0.85).abs() < 1e-9);
        assert_eq!(pipeline.live_sources(), 3);
    }

    #[test]
    fn late_frame_starts_now_not_in_the_past() {
        let (mut pipeline, probe) = pipeline();

        pipeline.enqueue(&frame(0.2), 24000).unwrap();
        probe.advance(1.0);
        let late = pipeline.enqueue(&frame(0.2), 24000).unwrap();

        assert!((late.start_at - 1.0).abs() < 1e-9);
        // First frame finished and was pruned
        assert_eq!(pipeline.live_sources(), 1);
    }

    #[test]
    fn reset_clock_aligns_with_long_running_graph() {
        let graph = MockPlayback::new().with_time(42.0);
        let mut pipeline = PlaybackPipeline::new(Box::new(graph));
        pipeline.reset_clock();
        let first = pipeline.enqueue(&frame(0.1), 24000).unwrap();
        assert_eq!(first.start_at, 42.0);
    }

    #[test]
    fn malformed_frame_leaves_schedule_untouched() {
        let (mut pipeline, probe) = pipeline();

        pipeline.enqueue(&frame(0.5), 24000).unwrap();
        let before = pipeline.next_start_time();
        let err = pipeline.enqueue("%%% not audio %%%", 24000).unwrap_err();

        assert!(matches!(err, EvaError::Decode { .. }));
        assert_eq!(pipeline.next_start_time(), before);
        assert_eq!(probe.scheduled().len(), 1);
    }

    #[test]
    fn stop_all_swallows_errors_and_clears() {
        let graph = MockPlayback::new().with_stop_failure();
        let probe = graph.probe();
        let mut pipeline = PlaybackPipeline::new(Box::new(graph));
        pipeline.resume().unwrap();

        pipeline.enqueue(&frame(0.5), 24000).unwrap();
        pipeline.enqueue(&frame(0.5), 24000).unwrap();
        pipeline.stop_all();
        pipeline.stop_all();

        assert_eq!(pipeline.live_sources(), 0);
        assert_eq!(probe.stopped(), vec![0, 1]);
    }

    #[test]
    fn interrupt_stops_sources_and_restarts_schedule_at_now() {
        let (mut pipeline, probe) = pipeline();

        pipeline.enqueue(&frame(1.0), 24000).unwrap();
        pipeline.enqueue(&frame(1.0), 24000).unwrap();
        probe.advance(0.3);
        pipeline.interrupt();

        assert!(probe.playing().is_empty());
        assert!((pipeline.next_start_time() - 0.3).abs() < 1e-9);
        let next = pipeline.enqueue(&frame(0.1), 24000).unwrap();
        assert!((next.start_at - 0.3).abs() < 1e-9);
    }

    #[test]
    fn gain_reaches_the_graph() {
        let (mut pipeline, probe) = pipeline();
        assert_eq!(probe.gain(), 1.0);

        pipeline.set_gain(0.4);
        assert!((probe.gain() - 0.4).abs() < 1e-6);
        pipeline.set_gain(-2.0);
        assert_eq!(probe.gain(), 0.0);
    }
}

use bytes::{Bytes, BytesMut};

use crate::buffer::{LevelSample, MediaBuffer};
use crate::segment::{MediaKind, Segment};

/// VAD segmentation configuration. All parameters are
/// global (not per-stream) per the original `segmentation_config.py`.
#[derive(Debug, Clone)]
pub struct VadSegmenterConfig {
    pub silence_threshold_db: f64,
    pub silence_duration_ns: u64,
    pub min_segment_ns: u64,
    pub max_segment_ns: u64,
    pub memory_limit_bytes: usize,
}

impl Default for VadSegmenterConfig {
    fn default() -> Self {
        Self {
            silence_threshold_db: -50.0,
            silence_duration_ns: 1_000_000_000,
            min_segment_ns: 1_000_000_000,
            max_segment_ns: 15_000_000_000,
            memory_limit_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VadState {
    Accumulating,
    InSilence,
}

/// Voice-activity-detected audio segmentation. Driven by two independent
/// input streams: raw audio buffers (`push_audio_buffer`) and RMS level
/// samples from a GStreamer `level` element (`push_level_sample`). Only the
/// level samples drive state transitions; audio buffers are only ever
/// accumulated while in the `Accumulating` state.
pub struct VadSegmenter {
    stream_id: String,
    config: VadSegmenterConfig,
    next_batch_number: u64,
    state: VadState,
    silence_since_ns: Option<u64>,
    pending_t0_ns: Option<u64>,
    accumulated_ns: u64,
    current: BytesMut,
}

impl VadSegmenter {
    pub fn new(stream_id: impl Into<String>, config: VadSegmenterConfig) -> Self {
        Self {
            stream_id: stream_id.into(),
            config,
            next_batch_number: 0,
            state: VadState::Accumulating,
            silence_since_ns: None,
            pending_t0_ns: None,
            accumulated_ns: 0,
            current: BytesMut::new(),
        }
    }

    pub fn push_audio_buffer(&mut self, buf: MediaBuffer) -> Option<Segment> {
        if self.state == VadState::InSilence {
            return None;
        }
        if self.pending_t0_ns.is_none() {
            self.pending_t0_ns = Some(buf.pts_ns);
        }
        self.current.extend_from_slice(&buf.bytes);
        self.accumulated_ns += buf.duration_ns;

        if self.current.len() >= self.config.memory_limit_bytes {
            return Some(self.finalize());
        }
        None
    }

    pub fn push_level_sample(&mut self, sample: LevelSample) -> Option<Segment> {
        match self.state {
            VadState::Accumulating => self.on_level_while_accumulating(sample),
            VadState::InSilence => {
                if sample.rms_db >= self.config.silence_threshold_db {
                    self.state = VadState::Accumulating;
                    self.pending_t0_ns = Some(sample.pts_ns);
                    self.accumulated_ns = 0;
                    self.current.clear();
                }
                None
            }
        }
    }

    fn on_level_while_accumulating(&mut self, sample: LevelSample) -> Option<Segment> {
        if sample.rms_db < self.config.silence_threshold_db {
            let since = *self.silence_since_ns.get_or_insert(sample.pts_ns);
            let elapsed = sample.pts_ns.saturating_sub(since);
            if elapsed >= self.config.silence_duration_ns
                && self.accumulated_ns >= self.config.min_segment_ns
            {
                let segment = self.finalize();
                self.state = VadState::InSilence;
                self.silence_since_ns = None;
                return Some(segment);
            }
        } else {
            self.silence_since_ns = None;
        }

        if !self.current.is_empty() && self.accumulated_ns >= self.config.max_segment_ns {
            return Some(self.finalize());
        }
        None
    }

    /// Flush on end-of-stream: emit the remainder only if it meets the
    /// minimum segment duration, otherwise discard it.
    pub fn flush(&mut self) -> Option<Segment> {
        if self.current.is_empty() || self.accumulated_ns < self.config.min_segment_ns {
            self.current.clear();
            self.accumulated_ns = 0;
            return None;
        }
        Some(self.finalize())
    }

    fn finalize(&mut self) -> Segment {
        let payload: Bytes = std::mem::take(&mut self.current).freeze();
        let t0_ns = self.pending_t0_ns.take().unwrap_or(0);
        let segment = Segment::new(
            self.stream_id.clone(),
            MediaKind::Audio,
            self.next_batch_number,
            t0_ns,
            self.accumulated_ns,
            payload,
        );
        self.next_batch_number += 1;
        self.accumulated_ns = 0;
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buf(pts_ns: u64, dur_ns: u64) -> MediaBuffer {
        MediaBuffer::new(Bytes::from_static(b"aac"), pts_ns, dur_ns, false)
    }

    fn level(pts_ns: u64, rms_db: f64) -> LevelSample {
        LevelSample { rms_db, pts_ns }
    }

    #[test]
    fn silence_after_min_duration_emits_segment() {
        let mut vad = VadSegmenter::new("s1", VadSegmenterConfig::default());
        vad.push_audio_buffer(buf(0, 1_500_000_000));
        vad.push_level_sample(level(0, -10.0));

        // Below threshold but not yet for the full silence_duration.
        assert!(vad.push_level_sample(level(1_500_000_000, -60.0)).is_none());
        assert!(vad
            .push_level_sample(level(2_000_000_000, -60.0))
            .is_none());

        // 1.0s of silence elapsed since 1_500_000_000, min_segment met.
        let seg = vad.push_level_sample(level(2_500_000_000, -60.0)).unwrap();
        assert_eq!(seg.batch_number, 0);
        assert_eq!(seg.duration_ns, 1_500_000_000);
    }

    #[test]
    fn silence_before_min_duration_does_not_emit() {
        let mut cfg = VadSegmenterConfig::default();
        cfg.min_segment_ns = 2_000_000_000;
        let mut vad = VadSegmenter::new("s1", cfg);
        vad.push_audio_buffer(buf(0, 500_000_000));
        vad.push_level_sample(level(0, -10.0));
        assert!(vad
            .push_level_sample(level(500_000_000, -60.0))
            .is_none());
        assert!(vad
            .push_level_sample(level(1_600_000_000, -60.0))
            .is_none());
    }

    #[test]
    fn resumes_accumulating_on_speech_after_silence() {
        let mut cfg = VadSegmenterConfig::default();
        cfg.silence_duration_ns = 500_000_000;
        cfg.min_segment_ns = 500_000_000;
        let mut vad = VadSegmenter::new("s1", cfg);
        vad.push_audio_buffer(buf(0, 1_000_000_000));
        vad.push_level_sample(level(0, -10.0));
        let first = vad
            .push_level_sample(level(1_500_000_000, -60.0))
            .unwrap();
        assert_eq!(first.batch_number, 0);

        // Still in silence; audio buffers must be dropped.
        assert!(vad.push_audio_buffer(buf(1_600_000_000, 200_000_000)).is_none());

        // Speech resumes at 2_000_000_000 — new t0 is the level sample pts.
        assert!(vad.push_level_sample(level(2_000_000_000, -5.0)).is_none());
        assert!(vad
            .push_audio_buffer(buf(2_010_000_000, 1_000_000_000))
            .is_none());
    }

    #[test]
    fn max_duration_forces_emission() {
        let mut cfg = VadSegmenterConfig::default();
        cfg.max_segment_ns = 2_000_000_000;
        cfg.silence_threshold_db = -200.0; // never silent
        let mut vad = VadSegmenter::new("s1", cfg);
        vad.push_audio_buffer(buf(0, 2_000_000_000));
        let seg = vad.push_level_sample(level(2_000_000_000, -10.0)).unwrap();
        assert_eq!(seg.duration_ns, 2_000_000_000);
    }

    #[test]
    fn memory_limit_forces_partial_emission() {
        let mut cfg = VadSegmenterConfig::default();
        cfg.memory_limit_bytes = 4;
        let mut vad = VadSegmenter::new("s1", cfg);
        let seg = vad.push_audio_buffer(buf(0, 100_000_000)).unwrap();
        assert_eq!(&seg.payload[..], b"aac");
    }
}

use bytes::{Bytes, BytesMut};

use crate::buffer::MediaBuffer;
use crate::segment::{MediaKind, Segment};

/// Duration-bounded, keyframe-aligned video segmentation.
///
/// Buffers are accumulated until the running duration reaches
/// `target_duration_ns` (minus `tolerance_ns`), at which point emission is
/// deferred until the next keyframe arrives — that keyframe both closes the
/// old segment and seeds the new one, guaranteeing every full segment
/// starts with an I-frame.
#[derive(Debug, Clone)]
pub struct VideoSegmenterConfig {
    pub target_duration_ns: u64,
    pub tolerance_ns: u64,
    pub min_partial_duration_ns: u64,
}

impl Default for VideoSegmenterConfig {
    fn default() -> Self {
        Self {
            target_duration_ns: 30_000_000_000,
            tolerance_ns: 100_000_000,
            min_partial_duration_ns: 1_000_000_000,
        }
    }
}

pub struct VideoSegmenter {
    stream_id: String,
    config: VideoSegmenterConfig,
    next_batch_number: u64,
    seen_first_keyframe: bool,
    waiting_for_keyframe: bool,
    t0_ns: u64,
    accumulated_ns: u64,
    current: BytesMut,
}

impl VideoSegmenter {
    pub fn new(stream_id: impl Into<String>, config: VideoSegmenterConfig) -> Self {
        Self {
            stream_id: stream_id.into(),
            config,
            next_batch_number: 0,
            seen_first_keyframe: false,
            waiting_for_keyframe: false,
            t0_ns: 0,
            accumulated_ns: 0,
            current: BytesMut::new(),
        }
    }

    /// Feed a single demuxed H.264 NAL-unit buffer. Returns a completed
    /// segment when this buffer closes one out.
    pub fn push(&mut self, buf: MediaBuffer) -> Option<Segment> {
        if !self.seen_first_keyframe {
            if !buf.is_keyframe {
                return None;
            }
            self.seen_first_keyframe = true;
            self.start_new(&buf);
            return None;
        }

        if self.waiting_for_keyframe && buf.is_keyframe {
            let finished = self.finalize();
            self.start_new(&buf);
            return Some(finished);
        }

        self.append(&buf);

        let threshold = self
            .config
            .target_duration_ns
            .saturating_sub(self.config.tolerance_ns);
        if !self.waiting_for_keyframe && self.accumulated_ns >= threshold {
            self.waiting_for_keyframe = true;
        }

        None
    }

    /// Flush on end-of-stream. A partial accumulation is
    /// only emitted if it meets the minimum duration; otherwise discarded.
    pub fn flush(&mut self) -> Option<Segment> {
        if self.current.is_empty() || self.accumulated_ns < self.config.min_partial_duration_ns {
            self.current.clear();
            self.accumulated_ns = 0;
            return None;
        }
        Some(self.finalize())
    }

    fn start_new(&mut self, buf: &MediaBuffer) {
        self.current.clear();
        self.t0_ns = buf.pts_ns;
        self.accumulated_ns = 0;
        self.waiting_for_keyframe = false;
        self.append(buf);
    }

    fn append(&mut self, buf: &MediaBuffer) {
        self.current.extend_from_slice(&buf.bytes);
        self.accumulated_ns += buf.duration_ns;
    }

    fn finalize(&mut self) -> Segment {
        let payload: Bytes = std::mem::take(&mut self.current).freeze();
        let segment = Segment::new(
            self.stream_id.clone(),
            MediaKind::Video,
            self.next_batch_number,
            self.t0_ns,
            self.accumulated_ns,
            payload,
        );
        self.next_batch_number += 1;
        segment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kf(pts_ns: u64, dur_ns: u64) -> MediaBuffer {
        MediaBuffer::new(Bytes::from_static(b"I"), pts_ns, dur_ns, true)
    }

    fn delta(pts_ns: u64, dur_ns: u64) -> MediaBuffer {
        MediaBuffer::new(Bytes::from_static(b"P"), pts_ns, dur_ns, false)
    }

    #[test]
    fn discards_leading_delta_frames_before_first_keyframe() {
        let mut seg = VideoSegmenter::new("s1", VideoSegmenterConfig::default());
        assert!(seg.push(delta(0, 33_000_000)).is_none());
        assert!(seg.push(kf(33_000_000, 33_000_000)).is_none());
    }

    #[test]
    fn emits_only_on_next_keyframe_after_target_reached() {
        let mut cfg = VideoSegmenterConfig::default();
        cfg.target_duration_ns = 1_000_000_000;
        cfg.tolerance_ns = 0;
        let mut seg = VideoSegmenter::new("s1", cfg);

        seg.push(kf(0, 400_000_000));
        assert!(seg.push(delta(400_000_000, 400_000_000)).is_none());
        // Accumulated 800ms < 1s target still.
        assert!(seg.push(delta(800_000_000, 400_000_000)).is_none());
        // Now past target (1200ms >= 1000ms) but not a keyframe yet.
        assert!(seg.push(delta(1_200_000_000, 400_000_000)).is_none());

        let emitted = seg.push(kf(1_600_000_000, 400_000_000)).unwrap();
        assert_eq!(emitted.batch_number, 0);
        assert_eq!(emitted.t0_ns, 0);
        assert_eq!(emitted.duration_ns, 1_600_000_000);
    }

    #[test]
    fn batch_numbers_increase_monotonically() {
        let mut cfg = VideoSegmenterConfig::default();
        cfg.target_duration_ns = 500_000_000;
        cfg.tolerance_ns = 0;
        let mut seg = VideoSegmenter::new("s1", cfg);

        seg.push(kf(0, 500_000_000));
        let first = seg.push(kf(500_000_000, 500_000_000)).unwrap();
        let second = seg.push(kf(1_000_000_000, 500_000_000)).unwrap();
        assert_eq!(first.batch_number, 0);
        assert_eq!(second.batch_number, 1);
    }

    #[test]
    fn partial_flush_below_minimum_is_discarded() {
        let mut seg = VideoSegmenter::new("s1", VideoSegmenterConfig::default());
        seg.push(kf(0, 500_000_000));
        assert!(seg.flush().is_none());
    }

    #[test]
    fn partial_flush_above_minimum_is_emitted() {
        let mut seg = VideoSegmenter::new("s1", VideoSegmenterConfig::default());
        seg.push(kf(0, 2_000_000_000));
        let flushed = seg.flush().unwrap();
        assert_eq!(flushed.duration_ns, 2_000_000_000);
    }
}

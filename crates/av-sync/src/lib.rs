pub mod error;

use std::collections::VecDeque;

use dubbing_segment::Segment;
pub use error::SyncError;

/// A matched video/audio pair ready to be pushed to the output pipeline.
#[derive(Debug, Clone)]
pub struct SyncPair {
    pub video: Segment,
    pub audio: Segment,
    pub pts_ns: u64,
}

#[derive(Debug, Clone)]
pub struct AvSyncConfig {
    pub av_offset_ns: u64,
    pub drift_threshold_ns: u64,
    pub slew_rate_ns: u64,
    pub buffer_capacity: usize,
}

impl Default for AvSyncConfig {
    fn default() -> Self {
        Self {
            av_offset_ns: 6_000_000_000,
            drift_threshold_ns: 120_000_000,
            slew_rate_ns: 10_000_000,
            buffer_capacity: 10,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct AvSyncStats {
    pub video_dropped: u64,
    pub audio_dropped: u64,
    pub pairs_emitted: u64,
}

/// Buffers unpaired video/audio segments and matches them by `batch_number`,
/// falling back to temporal-overlap pairing when the two sequences diverge.
/// Applies a fixed latency offset plus slew-based drift correction.
pub struct AvSyncManager {
    config: AvSyncConfig,
    video_buffer: VecDeque<Segment>,
    audio_buffer: VecDeque<Segment>,
    offset_ns: u64,
    video_pts_last: Option<u64>,
    audio_pts_last: Option<u64>,
    stats: AvSyncStats,
}

impl AvSyncManager {
    pub fn new(config: AvSyncConfig) -> Self {
        let offset_ns = config.av_offset_ns;
        Self {
            config,
            video_buffer: VecDeque::new(),
            audio_buffer: VecDeque::new(),
            offset_ns,
            video_pts_last: None,
            audio_pts_last: None,
            stats: AvSyncStats::default(),
        }
    }

    pub fn stats(&self) -> AvSyncStats {
        self.stats
    }

    pub fn push_video(&mut self, segment: Segment) -> Option<SyncPair> {
        self.push_with_eviction(segment, true);
        self.try_pair()
    }

    pub fn push_audio(&mut self, segment: Segment) -> Option<SyncPair> {
        self.push_with_eviction(segment, false);
        self.try_pair()
    }

    fn push_with_eviction(&mut self, segment: Segment, is_video: bool) {
        let (buffer, dropped) = if is_video {
            (&mut self.video_buffer, &mut self.stats.video_dropped)
        } else {
            (&mut self.audio_buffer, &mut self.stats.audio_dropped)
        };
        if buffer.len() >= self.config.buffer_capacity {
            buffer.pop_front();
            *dropped += 1;
        }
        buffer.push_back(segment);
    }

    fn try_pair(&mut self) -> Option<SyncPair> {
        if self.video_buffer.is_empty() || self.audio_buffer.is_empty() {
            return None;
        }

        // Index (batch-number) pairing — the common case when both sides
        // agree on segment count.
        if let Some(audio_idx) = self.audio_buffer.iter().position(|a| {
            self.video_buffer
                .iter()
                .any(|v| v.batch_number == a.batch_number)
        }) {
            let audio = self.audio_buffer.remove(audio_idx).unwrap();
            let video_idx = self
                .video_buffer
                .iter()
                .position(|v| v.batch_number == audio.batch_number)
                .unwrap();
            let video = self.video_buffer.remove(video_idx).unwrap();
            return Some(self.emit_pair(video, audio));
        }

        // Temporal-overlap fallback — video (duration-driven) and audio
        // (VAD-driven) segment counts have diverged.
        let audio_window = {
            let audio = self.audio_buffer.front()?;
            (audio.t0_ns, audio.end_t0_ns())
        };
        let best = self
            .video_buffer
            .iter()
            .enumerate()
            .map(|(i, v)| (i, overlap_ns((v.t0_ns, v.end_t0_ns()), audio_window)))
            .max_by_key(|(_, overlap)| *overlap);

        match best {
            Some((idx, overlap)) if overlap > 0 => {
                let audio = self.audio_buffer.pop_front().unwrap();
                let video = self.video_buffer.remove(idx).unwrap();
                Some(self.emit_pair(video, audio))
            }
            _ => None,
        }
    }

    fn emit_pair(&mut self, video: Segment, audio: Segment) -> SyncPair {
        let pts_ns = video.t0_ns.min(audio.t0_ns) + self.offset_ns;

        let video_pts = video.t0_ns + self.offset_ns;
        let audio_pts = audio.t0_ns + self.offset_ns;
        self.apply_drift_correction(video_pts, audio_pts);
        self.video_pts_last = Some(video_pts);
        self.audio_pts_last = Some(audio_pts);
        self.stats.pairs_emitted += 1;

        SyncPair {
            video,
            audio,
            pts_ns,
        }
    }

    /// Slew-based drift correction: never a hard jump, shift
    /// the running offset by `slew_rate_ns` toward closing the delta.
    fn apply_drift_correction(&mut self, video_pts: u64, audio_pts: u64) {
        let delta = video_pts.abs_diff(audio_pts);
        if delta <= self.config.drift_threshold_ns {
            return;
        }
        if video_pts > audio_pts {
            self.offset_ns += self.config.slew_rate_ns;
        } else {
            self.offset_ns = self.offset_ns.saturating_sub(self.config.slew_rate_ns);
        }
    }
}

fn overlap_ns(a: (u64, u64), b: (u64, u64)) -> u64 {
    let start = a.0.max(b.0);
    let end = a.1.min(b.1);
    end.saturating_sub(start)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use dubbing_segment::MediaKind;

    fn seg(kind: MediaKind, batch: u64, t0_ns: u64, dur_ns: u64) -> Segment {
        Segment::new("s1", kind, batch, t0_ns, dur_ns, Bytes::from_static(b"x"))
    }

    #[test]
    fn pairs_by_matching_batch_number() {
        let mut mgr = AvSyncManager::new(AvSyncConfig::default());
        assert!(mgr
            .push_video(seg(MediaKind::Video, 0, 0, 30_000_000_000))
            .is_none());
        let pair = mgr
            .push_audio(seg(MediaKind::Audio, 0, 0, 5_000_000_000))
            .unwrap();
        assert_eq!(pair.pts_ns, 6_000_000_000);
    }

    #[test]
    fn pts_strictly_increases_across_pairs() {
        let mut mgr = AvSyncManager::new(AvSyncConfig::default());
        mgr.push_video(seg(MediaKind::Video, 0, 0, 30_000_000_000));
        let p1 = mgr
            .push_audio(seg(MediaKind::Audio, 0, 0, 5_000_000_000))
            .unwrap();
        mgr.push_video(seg(MediaKind::Video, 1, 30_000_000_000, 30_000_000_000));
        let p2 = mgr
            .push_audio(seg(MediaKind::Audio, 1, 30_000_000_000, 5_000_000_000))
            .unwrap();
        assert!(p2.pts_ns > p1.pts_ns);
    }

    #[test]
    fn falls_back_to_temporal_overlap_when_batch_numbers_diverge() {
        let mut mgr = AvSyncManager::new(AvSyncConfig::default());
        // One long video segment spans two short VAD-driven audio segments.
        mgr.push_video(seg(MediaKind::Video, 0, 0, 30_000_000_000));
        let pair = mgr
            .push_audio(seg(MediaKind::Audio, 7, 1_000_000_000, 2_000_000_000))
            .unwrap();
        assert_eq!(pair.video.batch_number, 0);
        assert_eq!(pair.audio.batch_number, 7);
    }

    #[test]
    fn overflow_evicts_oldest_and_counts_it() {
        let mut cfg = AvSyncConfig::default();
        cfg.buffer_capacity = 1;
        let mut mgr = AvSyncManager::new(cfg);
        mgr.push_video(seg(MediaKind::Video, 0, 0, 30_000_000_000));
        mgr.push_video(seg(MediaKind::Video, 1, 30_000_000_000, 30_000_000_000));
        assert_eq!(mgr.stats().video_dropped, 1);
    }
}

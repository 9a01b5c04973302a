use bytes::Bytes;

/// A single timestamped media buffer handed to a segmenter by the input
/// media pipeline. Decoupled from GStreamer so the segmentation algorithms
/// can be unit tested without a live pipeline.
#[derive(Debug, Clone)]
pub struct MediaBuffer {
    pub bytes: Bytes,
    pub pts_ns: u64,
    pub duration_ns: u64,
    /// Only meaningful for video: true when this buffer carries an I-frame
    /// (GStreamer `GST_BUFFER_FLAG_DELTA_UNIT` unset).
    pub is_keyframe: bool,
}

impl MediaBuffer {
    pub fn new(bytes: Bytes, pts_ns: u64, duration_ns: u64, is_keyframe: bool) -> Self {
        Self {
            bytes,
            pts_ns,
            duration_ns,
            is_keyframe,
        }
    }

    pub fn end_pts_ns(&self) -> u64 {
        self.pts_ns + self.duration_ns
    }
}

/// A single RMS measurement taken from a GStreamer `level` element message,
/// used to drive VAD silence/speech detection independent of the audio
/// buffer flow itself.
#[derive(Debug, Clone, Copy)]
pub struct LevelSample {
    pub rms_db: f64,
    pub pts_ns: u64,
}

pub mod buffer;
pub mod error;
pub mod segment;
pub mod vad;
pub mod video;

pub use buffer::{LevelSample, MediaBuffer};
pub use error::SegmentError;
pub use segment::{MediaKind, Segment};
pub use vad::{VadSegmenter, VadSegmenterConfig};
pub use video::{VideoSegmenter, VideoSegmenterConfig};

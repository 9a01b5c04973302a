pub mod egress;
pub mod elements;
pub mod error;
pub mod ingest;

pub use egress::RtmpEgress;
pub use error::PipelineError;
pub use ingest::{BufferKind, RawBuffer, RtmpIngest};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SegmentError {
    #[error("accumulator memory limit exceeded: {used} > {limit} bytes")]
    MemoryLimitExceeded { used: usize, limit: usize },

    #[error("buffer pts {pts_ns} is not monotonic, last was {last_pts_ns}")]
    NonMonotonicPts { pts_ns: u64, last_pts_ns: u64 },

    #[error("generic error: {0}")]
    Generic(String),
}

impl From<anyhow::Error> for SegmentError {
    fn from(err: anyhow::Error) -> Self {
        SegmentError::Generic(err.to_string())
    }
}

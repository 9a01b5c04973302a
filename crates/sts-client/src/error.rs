use thiserror::Error;

#[derive(Error, Debug)]
pub enum StsError {
    #[error("not connected to STS service")]
    NotConnected,

    #[error("fragment tracker at capacity")]
    CapacityExceeded,

    #[error("circuit breaker open, send rejected")]
    BreakerOpen,

    #[error("backpressure wait timed out after {0:?}")]
    BackpressureTimeout(std::time::Duration),

    #[error("fragment payload too large: {size} bytes > {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("generic error: {0}")]
    Generic(String),
}

impl From<anyhow::Error> for StsError {
    fn from(err: anyhow::Error) -> Self {
        StsError::Generic(err.to_string())
    }
}

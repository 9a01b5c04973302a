use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("pipeline error: {0}")]
    Pipeline(#[from] media_pipeline::PipelineError),

    #[error("STS session error: {0}")]
    Sts(#[from] sts_client::StsError),

    #[error("worker for stream {0} already exists")]
    AlreadyRunning(String),

    #[error("worker for stream {0} not found")]
    NotFound(String),

    #[error("startup failed after retries: {0}")]
    StartupFailed(String),

    #[error("generic error: {0}")]
    Generic(String),
}

impl From<anyhow::Error> for WorkerError {
    fn from(err: anyhow::Error) -> Self {
        WorkerError::Generic(err.to_string())
    }
}

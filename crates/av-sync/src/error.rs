use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("generic error: {0}")]
    Generic(String),
}

impl From<anyhow::Error> for SyncError {
    fn from(err: anyhow::Error) -> Self {
        SyncError::Generic(err.to_string())
    }
}

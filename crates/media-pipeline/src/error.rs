use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("gstreamer init failed: {0}")]
    Init(#[from] gst::glib::Error),

    #[error("no audio track detected within startup window")]
    NoAudioTrack,

    #[error("element construction failed: {0}")]
    ElementBuild(String),

    #[error("pipeline state change failed: {0}")]
    StateChange(String),

    #[error("demux error: {0}")]
    Demux(String),

    #[error("unsupported codec negotiated on pad: {0}")]
    UnsupportedCodec(String),

    #[error("generic error: {0}")]
    Generic(String),
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Generic(err.to_string())
    }
}

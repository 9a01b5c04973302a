use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Configuration sent in `stream:init` and used to size local bookkeeping.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConfig {
    pub stream_id: String,
    pub worker_id: String,
    pub source_language: String,
    pub target_language: String,
    pub max_inflight: u32,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AudioData {
    pub format: String,
    pub sample_rate_hz: u32,
    pub channels: u8,
    pub duration_ms: u64,
    pub data_base64: String,
}

/// Outbound `fragment:data` payload.
#[derive(Debug, Clone, Serialize)]
pub struct FragmentDataPayload {
    pub fragment_id: Uuid,
    pub stream_id: String,
    pub sequence_number: u64,
    pub timestamp_ms: u64,
    pub audio: AudioData,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Queued,
    Processing,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FragmentAckPayload {
    pub fragment_id: Uuid,
    pub status: AckStatus,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessedStatus {
    Success,
    Partial,
    Failed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StageTimings {
    pub asr_ms: Option<u64>,
    pub translation_ms: Option<u64>,
    pub tts_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FragmentProcessedPayload {
    pub fragment_id: Uuid,
    pub sequence_number: u64,
    pub status: ProcessedStatus,
    pub dubbed_audio_base64: Option<String>,
    pub error: Option<ProcessingError>,
    pub processing_time_ms: u64,
    pub stage_timings: Option<StageTimings>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Timeout,
    ModelError,
    GpuOom,
    QueueFull,
    RateLimit,
    StreamNotFound,
    InvalidConfig,
    FragmentTooLarge,
    InvalidSequence,
}

impl ErrorCode {
    /// Whether a retry is worth attempting, or the failure implies a bug.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCode::Timeout
                | ErrorCode::ModelError
                | ErrorCode::GpuOom
                | ErrorCode::QueueFull
                | ErrorCode::RateLimit
        )
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureSeverity {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureAction {
    SlowDown,
    Pause,
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackpressurePayload {
    pub severity: BackpressureSeverity,
    pub action: BackpressureAction,
    pub current_inflight: u32,
    pub recommended_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamReadyPayload {
    pub session_id: String,
    pub capabilities: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamCompletePayload {
    pub total_fragments: u64,
    pub statistics: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireErrorPayload {
    pub code: ErrorCode,
    pub message: String,
    pub severity: String,
    pub retryable: bool,
}

use std::time::Duration;

use av_sync::AvSyncConfig;
use dubbing_segment::{VadSegmenterConfig, VideoSegmenterConfig};
use sts_client::{CircuitBreakerConfig, ReconnectionConfig};

/// Everything one `WorkerRuntime` needs to drive a single stream end to end.
/// Constructed by the external control plane (e.g. from a `stream ready`
/// hook payload) and handed to `WorkerManager::start_worker`.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub stream_id: String,
    pub worker_id: String,
    pub rtmp_input_url: String,
    pub rtmp_output_url: String,
    pub sts_url: String,
    pub source_language: String,
    pub target_language: String,
    pub max_inflight: usize,
    pub fragment_timeout: Duration,
    pub backpressure_wait: Duration,
    pub video_segmenter: VideoSegmenterConfig,
    pub vad_segmenter: VadSegmenterConfig,
    pub av_sync: AvSyncConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub reconnection: ReconnectionConfig,
    /// Bounded wait for `stream:complete` during a graceful stop.
    pub stop_grace_period: Duration,
    /// Backoff table for input reconnect attempts (default: 1s/2s/4s).
    pub input_retry_delays: Vec<Duration>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            stream_id: String::new(),
            worker_id: String::new(),
            rtmp_input_url: String::new(),
            rtmp_output_url: String::new(),
            sts_url: String::new(),
            source_language: "en".to_string(),
            target_language: "es".to_string(),
            max_inflight: 3,
            fragment_timeout: Duration::from_secs(60),
            backpressure_wait: Duration::from_secs(5),
            video_segmenter: VideoSegmenterConfig::default(),
            vad_segmenter: VadSegmenterConfig::default(),
            av_sync: AvSyncConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            reconnection: ReconnectionConfig::default(),
            stop_grace_period: Duration::from_secs(30),
            input_retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        }
    }
}

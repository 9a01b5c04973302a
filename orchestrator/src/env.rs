use std::env;
use std::time::Duration;

use dotenvy::dotenv;
use nanoid::nanoid;

use dubbing_segment::{VadSegmenterConfig, VideoSegmenterConfig};
use sts_client::{CircuitBreakerConfig, ReconnectionConfig};

/// Process-wide configuration, loaded once at startup. Per-stream fields
/// (URLs, languages) arrive later via the external control plane; this
/// struct only holds what is fixed for the life of the process.
#[derive(Debug, Clone)]
pub struct AppEnv {
    pub worker_id: String,
    pub mediamtx_host: String,
    pub sts_service_url: String,
    pub default_source_language: String,
    pub default_target_language: String,
    pub log_focus: bool,
    pub video: VideoSegmenterConfig,
    pub vad: VadSegmenterConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub reconnection: ReconnectionConfig,
}

impl Default for AppEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl AppEnv {
    pub fn new() -> Self {
        dotenv().ok();

        Self {
            worker_id: env::var("POD_ID").unwrap_or_else(|_| Self::random_worker_id()),
            mediamtx_host: env::var("MEDIAMTX_HOST").unwrap_or_else(|_| "mediamtx".to_string()),
            sts_service_url: env::var("STS_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            default_source_language: env::var("WORKER_SOURCE_LANGUAGE")
                .unwrap_or_else(|_| "en".to_string()),
            default_target_language: env::var("WORKER_TARGET_LANGUAGE")
                .unwrap_or_else(|_| "es".to_string()),
            log_focus: Self::get_bool("DUBBING_LOG_FOCUS", false),
            video: VideoSegmenterConfig {
                target_duration_ns: Self::get_seconds_ns("VAD_TARGET_DURATION_S", 30.0),
                tolerance_ns: Self::get_seconds_ns("VAD_TOLERANCE_S", 0.1),
                min_partial_duration_ns: Self::get_seconds_ns("VAD_MIN_PARTIAL_DURATION_S", 1.0),
            },
            vad: VadSegmenterConfig {
                silence_threshold_db: Self::get_f64("VAD_SILENCE_THRESHOLD_DB", -50.0),
                silence_duration_ns: Self::get_seconds_ns("VAD_SILENCE_DURATION_S", 1.0),
                min_segment_ns: Self::get_seconds_ns("VAD_MIN_SEGMENT_DURATION_S", 1.0),
                max_segment_ns: Self::get_seconds_ns("VAD_MAX_SEGMENT_DURATION_S", 15.0),
                memory_limit_bytes: Self::get_usize("VAD_MEMORY_LIMIT_BYTES", 10 * 1024 * 1024),
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: Self::get_u32("STS_BREAKER_FAILURE_THRESHOLD", 5),
                cooldown: Duration::from_secs(Self::get_u64("STS_BREAKER_COOLDOWN_S", 30)),
            },
            reconnection: ReconnectionConfig {
                initial_delay: Duration::from_secs(Self::get_u64("STS_RECONNECT_INITIAL_S", 1)),
                max_delay: Duration::from_secs(Self::get_u64("STS_RECONNECT_MAX_S", 30)),
                jitter: Self::get_f64("STS_RECONNECT_JITTER", 0.1),
                max_attempts: Self::get_u32("STS_RECONNECT_MAX_ATTEMPTS", 5),
            },
        }
    }

    pub fn rtmp_input_url(&self, stream_id: &str) -> String {
        format!("rtmp://{}:1935/live/{}/in", self.mediamtx_host, stream_id)
    }

    pub fn rtmp_output_url(&self, stream_id: &str) -> String {
        format!("rtmp://{}:1935/live/{}/out", self.mediamtx_host, stream_id)
    }

    fn random_worker_id() -> String {
        format!("dubbing-worker-{}", nanoid!(12))
    }

    fn get_bool(var: &str, default: bool) -> bool {
        env::var(var)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_f64(var: &str, default: f64) -> f64 {
        env::var(var)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_u32(var: &str, default: u32) -> u32 {
        env::var(var)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_u64(var: &str, default: u64) -> u64 {
        env::var(var)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_usize(var: &str, default: usize) -> usize {
        env::var(var)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    fn get_seconds_ns(var: &str, default_s: f64) -> u64 {
        let seconds = Self::get_f64(var, default_s);
        (seconds * 1_000_000_000.0) as u64
    }
}

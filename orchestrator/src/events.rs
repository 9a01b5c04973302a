use std::time::Duration;

use worker_core::WorkerConfig;

use crate::env::AppEnv;

/// Direction of a path like `live/<streamId>/in` or `live/<streamId>/out`,
/// as sent by the upstream media server's stream-lifecycle hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamDirection {
    In,
    Out,
}

fn split_path(path: &str) -> Option<(&str, StreamDirection)> {
    let mut parts = path.trim_matches('/').splitn(3, '/');
    let root = parts.next()?;
    if root != "live" {
        return None;
    }
    let stream_id = parts.next()?;
    let direction = match parts.next()? {
        "in" => StreamDirection::In,
        "out" => StreamDirection::Out,
        _ => return None,
    };
    Some((stream_id, direction))
}

/// Fired when an upstream path starts publishing. Only `in` (the raw source
/// feed) triggers a worker; `out` is the dubbed republish and is ignored
/// here, to avoid a worker spawning a worker.
#[derive(Debug, Clone)]
pub struct ReadyEvent {
    pub path: String,
    pub source_id: String,
}

impl ReadyEvent {
    pub fn extract_stream_id(&self) -> Option<&str> {
        split_path(&self.path).map(|(id, _)| id)
    }

    pub fn extract_direction(&self) -> Option<StreamDirection> {
        split_path(&self.path).map(|(_, dir)| dir)
    }

    /// Builds the per-stream config a `WorkerManager` needs to start
    /// dubbing this stream, filling per-stream fields from the event and
    /// process-wide defaults from `env`. Returns `None` for anything but an
    /// `in` path, mirroring the upstream hook handler's filtering.
    pub fn into_worker_config(self, env: &AppEnv) -> Option<WorkerConfig> {
        let (stream_id, StreamDirection::In) = split_path(&self.path)? else {
            return None;
        };
        let stream_id = stream_id.to_string();

        Some(WorkerConfig {
            stream_id: stream_id.clone(),
            worker_id: env.worker_id.clone(),
            rtmp_input_url: env.rtmp_input_url(&stream_id),
            rtmp_output_url: env.rtmp_output_url(&stream_id),
            sts_url: env.sts_service_url.clone(),
            source_language: env.default_source_language.clone(),
            target_language: env.default_target_language.clone(),
            max_inflight: 3,
            fragment_timeout: Duration::from_secs(60),
            backpressure_wait: Duration::from_secs(5),
            video_segmenter: env.video.clone(),
            vad_segmenter: env.vad.clone(),
            av_sync: Default::default(),
            circuit_breaker: env.circuit_breaker.clone(),
            reconnection: env.reconnection.clone(),
            stop_grace_period: Duration::from_secs(30),
            input_retry_delays: vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
            ],
        })
    }
}

/// Fired when an upstream path stops publishing.
#[derive(Debug, Clone)]
pub struct NotReadyEvent {
    pub path: String,
    pub source_id: String,
}

impl NotReadyEvent {
    pub fn extract_stream_id(&self) -> Option<&str> {
        split_path(&self.path).map(|(id, _)| id)
    }

    pub fn extract_direction(&self) -> Option<StreamDirection> {
        split_path(&self.path).map(|(_, dir)| dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_in_path() {
        let ev = ReadyEvent {
            path: "live/abc123/in".to_string(),
            source_id: "abc123".to_string(),
        };
        assert_eq!(ev.extract_stream_id(), Some("abc123"));
        assert_eq!(ev.extract_direction(), Some(StreamDirection::In));
    }

    #[test]
    fn out_path_yields_no_worker_config() {
        let ev = ReadyEvent {
            path: "live/abc123/out".to_string(),
            source_id: "abc123".to_string(),
        };
        let env = AppEnv::new();
        assert!(ev.into_worker_config(&env).is_none());
    }

    #[test]
    fn in_path_builds_worker_config_from_env_defaults() {
        let ev = ReadyEvent {
            path: "live/abc123/in".to_string(),
            source_id: "abc123".to_string(),
        };
        let env = AppEnv::new();
        let config = ev.into_worker_config(&env).expect("in path builds config");
        assert_eq!(config.stream_id, "abc123");
        assert!(config.rtmp_input_url.contains("abc123/in"));
        assert!(config.rtmp_output_url.contains("abc123/out"));
    }

    #[test]
    fn malformed_path_yields_no_stream_id() {
        let ev = ReadyEvent {
            path: "not-a-live-path".to_string(),
            source_id: "x".to_string(),
        };
        assert_eq!(ev.extract_stream_id(), None);
    }
}

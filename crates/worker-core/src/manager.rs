use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::runtime::WorkerRuntime;

/// Registry bridging external "stream ready"/"not ready" control-plane
/// events to `WorkerRuntime` instances. Mirrors the DashMap-registry shape
/// used for room/client bookkeeping elsewhere in this codebase, generalized
/// to per-stream async locks so `start_worker`/`stop_worker` stay
/// idempotent under concurrent calls for the same stream.
#[derive(Clone, Default)]
pub struct WorkerManager {
    workers: Arc<DashMap<String, Arc<WorkerRuntime>>>,
    locks: Arc<DashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl WorkerManager {
    pub fn new() -> Self {
        Self {
            workers: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
        }
    }

    fn lock_for(&self, stream_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(stream_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Idempotent: a second call for a stream with a live worker is a no-op.
    pub async fn start_worker(&self, config: WorkerConfig) -> Result<(), WorkerError> {
        let stream_id = config.stream_id.clone();
        let lock = self.lock_for(&stream_id);
        let _guard = lock.lock().await;

        if self.workers.contains_key(&stream_id) {
            info!(%stream_id, "worker already running, start is a no-op");
            return Ok(());
        }

        info!(%stream_id, "starting worker");
        let worker = Arc::new(WorkerRuntime::new(config));
        worker.start().await?;
        self.workers.insert(stream_id, worker);
        Ok(())
    }

    /// Idempotent and infallible to the caller: stop failures are logged,
    /// and the registry entry is removed either way.
    pub async fn stop_worker(&self, stream_id: &str) {
        let lock = self.lock_for(stream_id);
        let _guard = lock.lock().await;

        let Some((_, worker)) = self.workers.remove(stream_id) else {
            return;
        };
        info!(%stream_id, "stopping worker");
        worker.stop().await;
    }

    pub fn get_worker(&self, stream_id: &str) -> Option<Arc<WorkerRuntime>> {
        self.workers.get(stream_id).map(|w| w.clone())
    }

    /// Stops every registered worker concurrently and waits for all of them;
    /// individual failures are logged, never propagated.
    pub async fn cleanup_all(&self) {
        let stream_ids: Vec<String> = self.workers.iter().map(|e| e.key().clone()).collect();
        if stream_ids.is_empty() {
            info!("no active workers to clean up");
            return;
        }

        info!(count = stream_ids.len(), "cleaning up active workers");
        let tasks: Vec<_> = stream_ids
            .into_iter()
            .map(|stream_id| {
                let manager = self.clone();
                tokio::spawn(async move { manager.stop_worker(&stream_id).await })
            })
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "worker cleanup task panicked");
            }
        }
        info!("worker cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_manager_has_no_workers() {
        let manager = WorkerManager::new();
        assert!(manager.get_worker("s1").is_none());
    }
}

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct ReconnectionConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter: f64,
    /// 0 means unlimited.
    pub max_attempts: u32,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectOutcome {
    Reconnected,
    GaveUp,
    Cancelled,
}

/// Exponential backoff with jitter over STS reconnects.
/// Cancellable via the same `CancellationToken` the worker uses elsewhere,
/// so `worker.stop()` aborts any pending backoff immediately.
pub struct ReconnectionManager {
    config: ReconnectionConfig,
    attempt: AtomicU32,
    cancel: CancellationToken,
}

impl ReconnectionManager {
    pub fn new(config: ReconnectionConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            attempt: AtomicU32::new(0),
            cancel,
        }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base = self.config.initial_delay.as_secs_f64() * 2f64.powi(attempt as i32);
        let capped = base.min(self.config.max_delay.as_secs_f64());
        let jitter = capped * self.config.jitter;
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((capped + offset).max(0.0))
    }

    /// Drives reconnect attempts by calling `reconnect` until it succeeds,
    /// `max_attempts` is exhausted, or the cancellation token fires.
    pub async fn run<F, Fut>(self: Arc<Self>, mut reconnect: F) -> ReconnectOutcome
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        loop {
            let attempt = self.attempt();
            if self.config.max_attempts != 0 && attempt >= self.config.max_attempts {
                return ReconnectOutcome::GaveUp;
            }

            let delay = self.calculate_delay(attempt);
            tokio::select! {
                _ = self.cancel.cancelled() => return ReconnectOutcome::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }

            if reconnect().await {
                self.reset();
                return ReconnectOutcome::Reconnected;
            }
            self.attempt.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn delay_grows_exponentially_and_caps() {
        let cfg = ReconnectionConfig {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            jitter: 0.0,
            max_attempts: 0,
        };
        let mgr = ReconnectionManager::new(cfg, CancellationToken::new());
        assert_eq!(mgr.calculate_delay(0), Duration::from_secs(1));
        assert_eq!(mgr.calculate_delay(1), Duration::from_secs(2));
        assert_eq!(mgr.calculate_delay(2), Duration::from_secs(4));
        assert_eq!(mgr.calculate_delay(10), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let cfg = ReconnectionConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            max_attempts: 3,
        };
        let mgr = Arc::new(ReconnectionManager::new(cfg, CancellationToken::new()));
        let outcome = mgr.run(|| async { false }).await;
        assert_eq!(outcome, ReconnectOutcome::GaveUp);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_and_resets_attempt_counter() {
        let cfg = ReconnectionConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter: 0.0,
            max_attempts: 5,
        };
        let mgr = Arc::new(ReconnectionManager::new(cfg, CancellationToken::new()));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let outcome = mgr
            .clone()
            .run(move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    n >= 1
                }
            })
            .await;
        assert_eq!(outcome, ReconnectOutcome::Reconnected);
        assert_eq!(mgr.attempt(), 0);
    }

    #[tokio::test]
    async fn cancel_token_aborts_pending_backoff() {
        let cfg = ReconnectionConfig {
            initial_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
            max_attempts: 0,
        };
        let cancel = CancellationToken::new();
        let mgr = Arc::new(ReconnectionManager::new(cfg, cancel.clone()));
        cancel.cancel();
        let outcome = mgr.run(|| async { false }).await;
        assert_eq!(outcome, ReconnectOutcome::Cancelled);
    }
}

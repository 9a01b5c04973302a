use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use crate::models::{BackpressureAction, BackpressurePayload, BackpressureSeverity};

fn default_delay_ms(severity: BackpressureSeverity) -> u64 {
    match severity {
        BackpressureSeverity::Low => 100,
        BackpressureSeverity::Medium => 500,
        BackpressureSeverity::High => 1000,
        BackpressureSeverity::None => 0,
    }
}

/// Handles server-driven `backpressure` events: slow-down delays and
/// pause/resume gating ahead of every fragment send.
#[derive(Clone)]
pub struct BackpressureHandler {
    is_paused: Arc<AtomicBool>,
    delay_ms: Arc<AtomicU64>,
    resume: Arc<Notify>,
}

impl Default for BackpressureHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl BackpressureHandler {
    pub fn new() -> Self {
        Self {
            is_paused: Arc::new(AtomicBool::new(false)),
            delay_ms: Arc::new(AtomicU64::new(0)),
            resume: Arc::new(Notify::new()),
        }
    }

    pub fn is_paused(&self) -> bool {
        self.is_paused.load(Ordering::SeqCst)
    }

    pub fn delay_ms(&self) -> u64 {
        self.delay_ms.load(Ordering::SeqCst)
    }

    pub fn handle(&self, payload: &BackpressurePayload) {
        match payload.action {
            BackpressureAction::SlowDown => {
                let delay = payload
                    .recommended_delay_ms
                    .unwrap_or_else(|| default_delay_ms(payload.severity));
                self.delay_ms.store(delay, Ordering::SeqCst);
            }
            BackpressureAction::Pause => {
                self.is_paused.store(true, Ordering::SeqCst);
            }
            BackpressureAction::None => {
                self.is_paused.store(false, Ordering::SeqCst);
                self.delay_ms.store(0, Ordering::SeqCst);
                self.resume.notify_waiters();
            }
        }
    }

    pub fn reset(&self) {
        self.is_paused.store(false, Ordering::SeqCst);
        self.delay_ms.store(0, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    /// Blocks while paused (honoring `timeout`), then sleeps `delay_ms`.
    /// Returns `false` on timeout — the caller reroutes through the
    /// circuit-breaker fallback path.
    pub async fn wait_and_delay(&self, timeout: Duration) -> bool {
        if self.is_paused.load(Ordering::SeqCst) {
            let wait = self.resume.notified();
            match tokio::time::timeout(timeout, wait).await {
                Ok(_) => {}
                Err(_) => return false,
            }
        }
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_down_sets_default_delay_by_severity() {
        let bp = BackpressureHandler::new();
        bp.handle(&BackpressurePayload {
            severity: BackpressureSeverity::Medium,
            action: BackpressureAction::SlowDown,
            current_inflight: 2,
            recommended_delay_ms: None,
        });
        assert_eq!(bp.delay_ms(), 500);
    }

    #[tokio::test]
    async fn recommended_delay_overrides_default() {
        let bp = BackpressureHandler::new();
        bp.handle(&BackpressurePayload {
            severity: BackpressureSeverity::Low,
            action: BackpressureAction::SlowDown,
            current_inflight: 2,
            recommended_delay_ms: Some(250),
        });
        assert_eq!(bp.delay_ms(), 250);
    }

    #[tokio::test]
    async fn none_action_clears_pause_and_delay() {
        let bp = BackpressureHandler::new();
        bp.handle(&BackpressurePayload {
            severity: BackpressureSeverity::High,
            action: BackpressureAction::Pause,
            current_inflight: 3,
            recommended_delay_ms: None,
        });
        assert!(bp.is_paused());
        bp.handle(&BackpressurePayload {
            severity: BackpressureSeverity::None,
            action: BackpressureAction::None,
            current_inflight: 0,
            recommended_delay_ms: None,
        });
        assert!(!bp.is_paused());
        assert_eq!(bp.delay_ms(), 0);
    }

    #[tokio::test]
    async fn wait_and_delay_times_out_while_paused() {
        let bp = BackpressureHandler::new();
        bp.handle(&BackpressurePayload {
            severity: BackpressureSeverity::High,
            action: BackpressureAction::Pause,
            current_inflight: 3,
            recommended_delay_ms: None,
        });
        let ok = bp.wait_and_delay(Duration::from_millis(20)).await;
        assert!(!ok);
    }
}

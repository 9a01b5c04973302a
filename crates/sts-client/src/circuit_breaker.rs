use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::models::ErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    HalfOpen,
    Open,
}

struct Inner {
    state: BreakerState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    total_failures: u64,
    total_fallbacks: u64,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Closed/half-open/open gate over retryable STS failures.
/// Cooldown expiry is checked lazily on `should_send`/`record_*` rather than
/// via a background timer.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: BreakerState::Closed,
                failure_count: 0,
                last_failure_at: None,
                total_failures: 0,
                total_fallbacks: 0,
            })),
        }
    }

    fn check_cooldown(inner: &mut Inner, cooldown: Duration) {
        if inner.state == BreakerState::Open {
            if let Some(last) = inner.last_failure_at {
                if last.elapsed() >= cooldown {
                    inner.state = BreakerState::HalfOpen;
                }
            }
        }
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock();
        Self::check_cooldown(&mut inner, self.config.cooldown);
        inner.state
    }

    /// `true` if the caller should attempt an STS send; `false` means the
    /// caller must fall back to original audio.
    pub fn should_send(&self) -> bool {
        let mut inner = self.inner.lock();
        Self::check_cooldown(&mut inner, self.config.cooldown);
        match inner.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                inner.total_fallbacks += 1;
                false
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        Self::check_cooldown(&mut inner, self.config.cooldown);
        inner.failure_count = 0;
        if inner.state == BreakerState::HalfOpen {
            inner.state = BreakerState::Closed;
        }
    }

    /// Non-retryable failures are logged but do not count toward the
    /// breaker threshold — they imply a bug, not transient unhealth.
    pub fn record_failure(&self, code: ErrorCode) {
        let mut inner = self.inner.lock();
        Self::check_cooldown(&mut inner, self.config.cooldown);
        inner.total_failures += 1;

        if !code.is_retryable() {
            return;
        }

        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.last_failure_at = Some(Instant::now());
                inner.failure_count = self.config.failure_threshold;
            }
            BreakerState::Closed => {
                inner.failure_count += 1;
                inner.last_failure_at = Some(Instant::now());
                if inner.failure_count >= self.config.failure_threshold {
                    inner.state = BreakerState::Open;
                }
            }
            BreakerState::Open => {
                inner.last_failure_at = Some(Instant::now());
            }
        }
    }

    pub fn total_failures(&self) -> u64 {
        self.inner.lock().total_failures
    }

    pub fn total_fallbacks(&self) -> u64 {
        self.inner.lock().total_fallbacks
    }

    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(threshold: u32, cooldown: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: threshold,
            cooldown,
        }
    }

    #[test]
    fn opens_after_threshold_retryable_failures() {
        let cb = CircuitBreaker::new(cfg(3, Duration::from_secs(30)));
        cb.record_failure(ErrorCode::Timeout);
        cb.record_failure(ErrorCode::Timeout);
        assert!(cb.should_send());
        cb.record_failure(ErrorCode::Timeout);
        assert_eq!(cb.state(), BreakerState::Open);
        assert!(!cb.should_send());
    }

    #[test]
    fn non_retryable_failures_do_not_open_breaker() {
        let cb = CircuitBreaker::new(cfg(1, Duration::from_secs(30)));
        cb.record_failure(ErrorCode::InvalidConfig);
        assert_eq!(cb.state(), BreakerState::Closed);
        assert!(cb.should_send());
    }

    #[test]
    fn cooldown_moves_open_to_half_open() {
        let cb = CircuitBreaker::new(cfg(1, Duration::from_millis(1)));
        cb.record_failure(ErrorCode::Timeout);
        assert_eq!(cb.state(), BreakerState::Open);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
    }

    #[test]
    fn half_open_success_closes_breaker() {
        let cb = CircuitBreaker::new(cfg(1, Duration::from_millis(1)));
        cb.record_failure(ErrorCode::Timeout);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_success();
        assert_eq!(cb.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_resets_cooldown() {
        let cb = CircuitBreaker::new(cfg(1, Duration::from_millis(5)));
        cb.record_failure(ErrorCode::Timeout);
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(cb.state(), BreakerState::HalfOpen);
        cb.record_failure(ErrorCode::Timeout);
        assert_eq!(cb.state(), BreakerState::Open);
        // Cooldown timer was reset by the half-open failure.
        assert_eq!(cb.state(), BreakerState::Open);
    }
}

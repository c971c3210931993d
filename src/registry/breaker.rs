//! Circuit Breaker - per-cluster closed/open/half-open gate
//!
//! Three-state gate grounded in the self-healing supervisor's
//! `CircuitBreakerState` pattern (Closed/Open/HalfOpen with a consecutive-
//! failure counter and a reset timeout), adapted here to guard a single
//! cluster's calls rather than a component's.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

/// Default consecutive-failure threshold before tripping to `Open`.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;
/// Default time `Open` must elapse before a probe is allowed.
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    /// `true` while a HalfOpen probe is outstanding; gates the single permit.
    probe_in_flight: bool,
}

/// A permit granted by `allow()`. The caller MUST report the outcome back
/// via `record_success`/`record_failure` exactly once.
pub struct Permit {
    is_half_open_probe: bool,
}

impl Permit {
    pub fn is_half_open_probe(&self) -> bool {
        self.is_half_open_probe
    }
}

pub struct CircuitBreaker {
    failure_threshold: u32,
    reset_timeout: Duration,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                probe_in_flight: false,
            }),
        }
    }

    pub async fn state(&self) -> BreakerState {
        self.inner.lock().await.state
    }

    pub async fn last_failure_age(&self) -> Option<Duration> {
        self.inner.lock().await.opened_at.map(|t| t.elapsed())
    }

    /// Request permission to call the remote cluster. Never cancelled by
    /// context; circuit breaker transitions are pure state updates.
    pub async fn allow(&self) -> Option<Permit> {
        let mut inner = self.inner.lock().await;

        match inner.state {
            BreakerState::Closed => Some(Permit {
                is_half_open_probe: false,
            }),
            BreakerState::Open => {
                let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or_default();
                if elapsed >= self.reset_timeout {
                    inner.state = BreakerState::HalfOpen;
                    inner.probe_in_flight = true;
                    Some(Permit {
                        is_half_open_probe: true,
                    })
                } else {
                    None
                }
            }
            BreakerState::HalfOpen => {
                if inner.probe_in_flight {
                    None
                } else {
                    inner.probe_in_flight = true;
                    Some(Permit {
                        is_half_open_probe: true,
                    })
                }
            }
        }
    }

    pub async fn record_success(&self, permit: Permit) {
        let mut inner = self.inner.lock().await;
        inner.consecutive_failures = 0;
        if permit.is_half_open_probe {
            inner.probe_in_flight = false;
        }
        inner.state = BreakerState::Closed;
        inner.opened_at = None;
    }

    pub async fn record_failure(&self, permit: Permit) {
        let mut inner = self.inner.lock().await;
        if permit.is_half_open_probe {
            inner.probe_in_flight = false;
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
            return;
        }

        inner.consecutive_failures += 1;
        if inner.consecutive_failures >= self.failure_threshold {
            inner.state = BreakerState::Open;
            inner.opened_at = Some(Instant::now());
        }
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(DEFAULT_FAILURE_THRESHOLD, DEFAULT_RESET_TIMEOUT)
    }
}

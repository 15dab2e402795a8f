use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Per-module failure tracker (spec §4.9, property 8). Counts
/// consecutive failures; once `failure_threshold` is reached the
/// breaker opens and the scheduler skips the module's ticks until
/// `reset_timeout` has elapsed, at which point exactly one half-open
/// attempt is allowed through.
#[derive(Debug)]
pub struct CircuitBreaker {
    module: &'static str,
    failure_threshold: u32,
    reset_timeout: Duration,
    consecutive_failures: u32,
    state: BreakerState,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(module: &'static str, failure_threshold: u32, reset_timeout: Duration) -> Self {
        CircuitBreaker {
            module,
            failure_threshold,
            reset_timeout,
            consecutive_failures: 0,
            state: BreakerState::Closed,
            opened_at: None,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the module should be dispatched this tick. `Open`
    /// transitions to `HalfOpen` (and returns `true`, permitting one
    /// attempt) once `reset_timeout` has elapsed since it opened.
    pub fn should_attempt(&mut self, now: Instant) -> bool {
        match self.state {
            BreakerState::Closed | BreakerState::HalfOpen => true,
            BreakerState::Open => {
                let opened_at = self.opened_at.expect("Open state always has opened_at");
                if now.duration_since(opened_at) >= self.reset_timeout {
                    self.state = BreakerState::HalfOpen;
                    debug!(module = self.module, "circuit breaker half-open");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        if self.state != BreakerState::Closed {
            debug!(module = self.module, "circuit breaker closed");
        }
        self.state = BreakerState::Closed;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures += 1;
        if self.state == BreakerState::HalfOpen || self.consecutive_failures >= self.failure_threshold {
            if self.state != BreakerState::Open {
                warn!(
                    module = self.module,
                    consecutive_failures = self.consecutive_failures,
                    "circuit breaker open"
                );
            }
            self.state = BreakerState::Open;
            self.opened_at = Some(now);
        }
    }
}

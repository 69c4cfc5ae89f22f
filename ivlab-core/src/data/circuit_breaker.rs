//! Circuit breaker for provider bans and rate limits.
//!
//! HTTP 403 trips the breaker at once. Repeated 429s or server errors trip it
//! after `failure_threshold` consecutive failures. While open, every request
//! is refused until the cooldown has elapsed.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Closed { consecutive_failures: u32 },
    Open { tripped_at: Instant },
}

/// Shared breaker guarding every request a provider makes.
#[derive(Debug)]
pub struct CircuitBreaker {
    gate: Mutex<Gate>,
    cooldown: Duration,
    failure_threshold: u32,
}

impl CircuitBreaker {
    pub fn new(cooldown: Duration, failure_threshold: u32) -> Self {
        Self {
            gate: Mutex::new(Gate::Closed {
                consecutive_failures: 0,
            }),
            cooldown,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// 30-minute cooldown, trips after 3 consecutive failures.
    pub fn default_provider() -> Self {
        Self::new(Duration::from_secs(30 * 60), 3)
    }

    fn lock(&self) -> MutexGuard<'_, Gate> {
        // A poisoned gate still holds a valid state value.
        self.gate.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Whether a request may go out now. Closes the gate once the cooldown expires.
    pub fn is_allowed(&self) -> bool {
        let mut gate = self.lock();
        match *gate {
            Gate::Closed { .. } => true,
            Gate::Open { tripped_at } if tripped_at.elapsed() >= self.cooldown => {
                *gate = Gate::Closed {
                    consecutive_failures: 0,
                };
                tracing::info!("provider circuit breaker cooled down");
                true
            }
            Gate::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        let mut gate = self.lock();
        if let Gate::Closed { .. } = *gate {
            *gate = Gate::Closed {
                consecutive_failures: 0,
            };
        }
    }

    pub fn record_failure(&self) {
        let mut gate = self.lock();
        if let Gate::Closed {
            consecutive_failures,
        } = *gate
        {
            let failures = consecutive_failures + 1;
            *gate = if failures >= self.failure_threshold {
                tracing::warn!(failures, "provider circuit breaker tripped");
                Gate::Open {
                    tripped_at: Instant::now(),
                }
            } else {
                Gate::Closed {
                    consecutive_failures: failures,
                }
            };
        }
    }

    /// Open the breaker immediately (403 Forbidden / IP ban).
    pub fn trip(&self) {
        tracing::warn!("provider circuit breaker tripped by a ban response");
        *self.lock() = Gate::Open {
            tripped_at: Instant::now(),
        };
    }

    /// Remaining cooldown time (zero if closed).
    pub fn remaining_cooldown(&self) -> Duration {
        match *self.lock() {
            Gate::Closed { .. } => Duration::ZERO,
            Gate::Open { tripped_at } => self.cooldown.saturating_sub(tripped_at.elapsed()),
        }
    }
}

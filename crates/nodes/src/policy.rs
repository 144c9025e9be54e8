//! Per-node-type execution policy: retries, back-off and timeout.

use std::time::Duration;

/// Exponential back-off between retry attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Growth factor applied for every further retry.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl Backoff {
    /// A constant delay between attempts.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
            max_delay: delay,
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let scaled = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(scaled.max(0.0))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(100),
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

/// Tuning knobs registered alongside a node capability.
///
/// The default policy has no retries and no implicit timeout.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodePolicy {
    /// How many times a retryable failure is re-attempted.
    pub max_retries: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
    /// Per-attempt timeout; `None` lets the capability run indefinitely.
    pub timeout: Option<Duration>,
}

impl NodePolicy {
    pub fn with_retries(mut self, max_retries: u32, backoff: Backoff) -> Self {
        self.max_retries = max_retries;
        self.backoff = backoff;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

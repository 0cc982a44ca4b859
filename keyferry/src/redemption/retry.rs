//! Retries for reveal and activation calls that fail in transit.
//!
//! Only transport-level failures and unreadable responses come through
//! here. A definite answer from either storefront is never retried.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Upper bound on the random extra added to a delay, as a fraction of it.
const JITTER_FRACTION: f64 = 0.25;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Extra attempts after the first call.
    pub retries: u32,
    /// Pause before the first retry.
    pub first_delay_ms: u64,
    pub delay_cap_ms: u64,
    /// Each pause is this many times the previous one.
    pub growth: f64,
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            first_delay_ms: 2_000,
            delay_cap_ms: 30_000,
            growth: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            retries: 0,
            ..Self::default()
        }
    }

    /// Pause before retry number `retry` (1-based). Retry 0 is the first call.
    pub fn delay_before(&self, retry: u32) -> Duration {
        let Some(steps) = retry.checked_sub(1) else {
            return Duration::ZERO;
        };
        let cap = Duration::from_millis(self.delay_cap_ms);
        let grown = Duration::from_millis(self.first_delay_ms).mul_f64(self.growth.powi(steps as i32));
        let delay = grown.min(cap);

        if self.jitter {
            delay.mul_f64(1.0 + JITTER_FRACTION * rand::random::<f64>())
        } else {
            delay
        }
    }

    /// Whether a call that has already been retried `retried` times may go again.
    pub fn should_retry(&self, retried: u32) -> bool {
        retried < self.retries
    }

    /// Sleep before retry number `retry`. Returns `false` if cancelled.
    pub async fn backoff(&self, retry: u32, cancel: &CancellationToken) -> bool {
        let delay = self.delay_before(retry);
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}

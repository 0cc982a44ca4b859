//! Process-wide rate-limit cooldown.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Cooldown {
    resume_at: Instant,
    until: DateTime<Utc>,
}

/// Shared flag telling every redemption path to stop until a deadline.
///
/// Clones share state. Timing follows the tokio clock; the wall-clock end
/// time is kept for reporting.
#[derive(Debug, Clone, Default)]
pub struct CooldownGate {
    inner: Arc<RwLock<Option<Cooldown>>>,
}

impl CooldownGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engage for `duration`, extending any shorter cooldown already set.
    pub fn engage(&self, duration: Duration) -> DateTime<Utc> {
        let resume_at = Instant::now() + duration;
        let until = Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::hours(1));

        let mut guard = self.inner.write();
        match *guard {
            Some(existing) if existing.resume_at >= resume_at => existing.until,
            _ => {
                *guard = Some(Cooldown { resume_at, until });
                until
            }
        }
    }

    /// End of the active cooldown, if one is still running.
    pub fn engaged_until(&self) -> Option<DateTime<Utc>> {
        let current = *self.inner.read();
        current
            .filter(|c| Instant::now() < c.resume_at)
            .map(|c| c.until)
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged_until().is_some()
    }

    /// Time left on the active cooldown.
    pub fn remaining(&self) -> Option<Duration> {
        let current = *self.inner.read();
        current.and_then(|c| {
            let now = Instant::now();
            (now < c.resume_at).then(|| c.resume_at - now)
        })
    }

    pub fn release(&self) {
        *self.inner.write() = None;
    }
}

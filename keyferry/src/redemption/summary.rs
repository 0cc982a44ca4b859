use chrono::{DateTime, Utc};

use super::RedemptionOutcome;
use crate::ownership::OwnershipVerdict;
use crate::session::Provider;

/// What happened to one key during a run.
#[derive(Debug, Clone, PartialEq)]
pub enum KeyDisposition {
    /// Attempted this run, with the recorded outcome.
    Attempted(RedemptionOutcome),
    /// A non-retryable ledger entry already covers the key.
    Settled(RedemptionOutcome),
    /// Recorded as owned without contacting the target platform.
    SkippedOwned(OwnershipVerdict),
    /// Same game as a key already handled; recorded as owned.
    SkippedDuplicate,
    /// Left unrevealed because ownership could not be checked.
    SkippedPending,
    /// Not reached because the run halted.
    NotAttempted,
}

impl KeyDisposition {
    /// Outcome written to the ledger for this key during the run, if any.
    pub fn recorded_outcome(&self) -> Option<RedemptionOutcome> {
        match self {
            KeyDisposition::Attempted(outcome) => Some(*outcome),
            KeyDisposition::SkippedOwned(_) | KeyDisposition::SkippedDuplicate => {
                Some(RedemptionOutcome::AlreadyOwnedElsewhere)
            }
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaltReason {
    /// The target platform throttled activations.
    RateLimited,
    SessionExpired(Provider),
    Cancelled,
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::RateLimited => f.write_str("rate limited"),
            HaltReason::SessionExpired(provider) => write!(f, "{} session expired", provider),
            HaltReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct KeyReport {
    pub key_id: String,
    pub title: String,
    pub disposition: KeyDisposition,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub reports: Vec<KeyReport>,
    /// End of the cooldown, if one was started.
    pub cooldown_until: Option<DateTime<Utc>>,
    pub halted: Option<HaltReason>,
}

impl RunSummary {
    pub fn count_outcome(&self, outcome: RedemptionOutcome) -> usize {
        self.reports
            .iter()
            .filter(|r| r.disposition.recorded_outcome() == Some(outcome))
            .count()
    }

    pub fn count(&self, predicate: impl Fn(&KeyDisposition) -> bool) -> usize {
        self.reports.iter().filter(|r| predicate(&r.disposition)).count()
    }

    pub fn redeemed(&self) -> usize {
        self.count_outcome(RedemptionOutcome::Redeemed)
    }

    pub fn settled(&self) -> usize {
        self.count(|d| matches!(d, KeyDisposition::Settled(_)))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|d| matches!(d, KeyDisposition::NotAttempted))
    }

    /// Titles left unrevealed because ownership could not be checked.
    pub fn skipped_pending_titles(&self) -> Vec<&str> {
        self.reports
            .iter()
            .filter(|r| r.disposition == KeyDisposition::SkippedPending)
            .map(|r| r.title.as_str())
            .collect()
    }

    pub fn report_for(&self, key_id: &str) -> Option<&KeyReport> {
        self.reports.iter().find(|r| r.key_id == key_id)
    }
}

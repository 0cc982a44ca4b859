//! Picking games from Humble Choice months.
//!
//! Claimed games add keys to the month's order; a run restricted to those
//! orders then redeems them like any other key.

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::remote::{ChoiceMonth, ChoiceOption, KeySourceClient, RemoteError};
use crate::session::Session;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no game number {0} in this month")]
    OutOfRange(usize),

    #[error("picked {picked} games but only {remaining} choices are left")]
    TooMany { picked: usize, remaining: u32 },
}

#[derive(Debug, Error)]
pub enum ChoiceError {
    #[error("key source session expired")]
    SessionExpired,

    #[error("could not load Choice months: {0}")]
    Listing(RemoteError),

    #[error(transparent)]
    Selection(#[from] SelectionError),
}

/// What happened to the games picked in one month.
#[derive(Debug, Clone, Default)]
pub struct MonthOutcome {
    pub order_id: String,
    pub claimed: Vec<String>,
    /// Picked games that have to be claimed on the website.
    pub on_website: Vec<ChoiceOption>,
    pub failed: Vec<(String, RemoteError)>,
    /// Picks left unclaimed because the run was cancelled.
    pub skipped: usize,
}

impl MonthOutcome {
    /// Whether the month's order may now hold new keys.
    pub fn has_new_keys(&self) -> bool {
        !self.claimed.is_empty() || !self.on_website.is_empty()
    }
}

/// Whether every game still offered fits in the month's remaining picks.
pub fn takes_all(month: &ChoiceMonth) -> bool {
    !month.options.is_empty() && month.options.len() <= month.remaining as usize
}

/// Resolve 0-based picks against a month, in offer order, without duplicates.
pub fn select<'a>(month: &'a ChoiceMonth, picks: &[usize]) -> Result<Vec<&'a ChoiceOption>, SelectionError> {
    let picks: BTreeSet<usize> = picks.iter().copied().collect();
    if let Some(&bad) = picks.iter().find(|&&i| i >= month.options.len()) {
        return Err(SelectionError::OutOfRange(bad + 1));
    }
    if picks.len() > month.remaining as usize {
        return Err(SelectionError::TooMany {
            picked: picks.len(),
            remaining: month.remaining,
        });
    }
    Ok(picks.into_iter().map(|i| &month.options[i]).collect())
}

pub struct Chooser {
    client: Arc<dyn KeySourceClient>,
}

impl Chooser {
    pub fn new(client: Arc<dyn KeySourceClient>) -> Self {
        Self { client }
    }

    /// Months with picks left. Months with nothing left to offer are dropped.
    #[instrument(skip_all)]
    pub async fn pending_months(&self, session: &Session) -> Result<Vec<ChoiceMonth>, ChoiceError> {
        let months = match self.client.choice_months(session).await {
            Ok(months) => months,
            Err(RemoteError::Unauthorized) => {
                session.mark_expired();
                return Err(ChoiceError::SessionExpired);
            }
            Err(e) => return Err(ChoiceError::Listing(e)),
        };
        session.mark_in_use();

        let (pending, exhausted): (Vec<_>, Vec<_>) = months.into_iter().partition(|m| !m.options.is_empty());
        for month in &exhausted {
            warn!(month = %month.title, remaining = month.remaining, "Choice month offers nothing left to pick");
        }
        info!(months = pending.len(), "Loaded Choice months");
        Ok(pending)
    }

    /// Claim the picked games of `month`, one at a time.
    ///
    /// A rejected session stops claiming and fails; other failures are
    /// recorded per game.
    #[instrument(skip_all, fields(month = %month.title))]
    pub async fn choose(
        &self,
        session: &Session,
        month: &ChoiceMonth,
        picks: &[usize],
        cancel: &CancellationToken,
    ) -> Result<MonthOutcome, ChoiceError> {
        let selected = select(month, picks)?;
        let mut outcome = MonthOutcome {
            order_id: month.order_id.clone(),
            ..MonthOutcome::default()
        };

        for (done, option) in selected.iter().enumerate() {
            if cancel.is_cancelled() {
                outcome.skipped = selected.len() - done;
                break;
            }
            if option.website_only() {
                outcome.on_website.push((*option).clone());
                continue;
            }
            match self.client.choose_content(session, month, option).await {
                Ok(()) => {
                    info!(game = %option.title, "Claimed");
                    outcome.claimed.push(option.title.clone());
                }
                Err(RemoteError::Unauthorized) => {
                    session.mark_expired();
                    return Err(ChoiceError::SessionExpired);
                }
                Err(e) => {
                    warn!(game = %option.title, error = %e, "Claim failed");
                    outcome.failed.push((option.title.clone(), e));
                }
            }
        }
        Ok(outcome)
    }
}

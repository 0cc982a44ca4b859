//! One end-to-end run: sign in, gather, match, redeem.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::auth::{AuthFailure, KeySourceAuthenticator, Operator, RunMode, TargetAuthenticator};
use crate::catalog::{CatalogError, CatalogFetcher};
use crate::choice::{ChoiceError, Chooser, MonthOutcome};
use crate::config::EngineConfig;
use crate::inventory::{AggregationError, InventoryAggregator};
use crate::ledger::{Ledger, LedgerError, LedgerStore, LegacyEntry};
use crate::ownership::{OwnershipMatcher, OwnershipVerdict};
use crate::redemption::{
    CooldownGate, HaltReason, RedemptionController, RedemptionEvent, RedemptionPolicy, RunSummary,
    Sessions,
};
use crate::remote::{ChoiceMonth, KeySourceClient, TargetPlatformClient};
use crate::session::{Provider, Session, SessionStore};

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    Failure,
    /// A saved session is missing or expired and no operator can sign in.
    SessionRequired,
    /// Stopped by a rate limit; try again after the cooldown.
    CooldownPending,
    Interrupted,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::Failure => 1,
            ExitStatus::SessionRequired => 3,
            ExitStatus::CooldownPending => 75,
            ExitStatus::Interrupted => 130,
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("{provider} sign-in failed: {failure}")]
    Auth {
        provider: Provider,
        failure: AuthFailure,
    },

    #[error(transparent)]
    Inventory(#[from] AggregationError),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Choice(#[from] ChoiceError),

    #[error("run cancelled")]
    Cancelled,
}

impl RunError {
    pub fn exit_status(&self) -> ExitStatus {
        match self {
            RunError::Auth {
                failure: AuthFailure::SessionRequired(_),
                ..
            } => ExitStatus::SessionRequired,
            RunError::Auth {
                failure: AuthFailure::Cancelled,
                ..
            }
            | RunError::Inventory(AggregationError::Cancelled)
            | RunError::Cancelled => ExitStatus::Interrupted,
            RunError::Inventory(AggregationError::SessionExpired)
            | RunError::Catalog(CatalogError::SessionExpired)
            | RunError::Choice(ChoiceError::SessionExpired) => ExitStatus::SessionRequired,
            _ => ExitStatus::Failure,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub mode: RunMode,
    pub reveal_all: bool,
    pub wait_out_cooldown: bool,
    /// Target platform web API key, for the owned catalog.
    pub api_key: Option<String>,
    /// Only redeem keys of these orders.
    pub orders: Option<Vec<String>>,
}

/// Match statistics for the report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchCounts {
    pub confident: usize,
    pub fuzzy: usize,
    pub not_owned: usize,
    pub unknown: usize,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub keys_found: usize,
    pub orders_total: usize,
    pub orders_failed: usize,
    /// Why ownership could not be checked, if it could not.
    pub catalog_unavailable: Option<String>,
    pub matches: MatchCounts,
    pub summary: RunSummary,
}

impl RunReport {
    pub fn exit_status(&self) -> ExitStatus {
        match self.summary.halted {
            None => ExitStatus::Success,
            Some(HaltReason::RateLimited) => ExitStatus::CooldownPending,
            Some(HaltReason::SessionExpired(_)) => ExitStatus::SessionRequired,
            Some(HaltReason::Cancelled) => ExitStatus::Interrupted,
        }
    }
}

/// Everything a run talks to.
pub struct RedeemerParts {
    pub key_source: Arc<dyn KeySourceClient>,
    pub target: Arc<dyn TargetPlatformClient>,
    pub sessions: Arc<dyn SessionStore>,
    pub ledger: Arc<dyn LedgerStore>,
    pub operator: Arc<dyn Operator>,
    pub config: EngineConfig,
}

pub struct Redeemer {
    parts: RedeemerParts,
    legacy: Vec<LegacyEntry>,
    gate: CooldownGate,
    events: Option<mpsc::UnboundedSender<RedemptionEvent>>,
}

impl Redeemer {
    pub fn new(parts: RedeemerParts) -> Self {
        Self {
            parts,
            legacy: Vec::new(),
            gate: CooldownGate::new(),
            events: None,
        }
    }

    /// Outcomes imported from older CSV exports.
    pub fn with_legacy(mut self, legacy: Vec<LegacyEntry>) -> Self {
        self.legacy = legacy;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<RedemptionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn cooldown_gate(&self) -> &CooldownGate {
        &self.gate
    }

    async fn discard_session(&self, provider: Provider) {
        if let Err(e) = self.parts.sessions.invalidate(provider).await {
            warn!(%provider, error = %e, "Failed to discard expired session");
        }
    }

    pub async fn sign_in_key_source(
        &self,
        mode: RunMode,
        cancel: &CancellationToken,
    ) -> Result<Arc<Session>, RunError> {
        let parts = &self.parts;
        KeySourceAuthenticator::new(
            parts.key_source.clone(),
            parts.sessions.clone(),
            parts.operator.clone(),
            parts.config.auth.clone(),
            mode,
        )
        .authenticate(cancel)
        .await
        .map_err(|failure| RunError::Auth {
            provider: Provider::KeySource,
            failure,
        })
    }

    /// Humble Choice months with games left to pick.
    pub async fn choice_months(&self, session: &Session) -> Result<Vec<ChoiceMonth>, RunError> {
        let result = Chooser::new(self.parts.key_source.clone())
            .pending_months(session)
            .await;
        if matches!(result, Err(ChoiceError::SessionExpired)) {
            self.discard_session(Provider::KeySource).await;
        }
        Ok(result?)
    }

    /// Claim the picked games of one month. `picks` index `month.options`.
    pub async fn choose(
        &self,
        session: &Session,
        month: &ChoiceMonth,
        picks: &[usize],
        cancel: &CancellationToken,
    ) -> Result<MonthOutcome, RunError> {
        let result = Chooser::new(self.parts.key_source.clone())
            .choose(session, month, picks, cancel)
            .await;
        if matches!(result, Err(ChoiceError::SessionExpired)) {
            self.discard_session(Provider::KeySource).await;
        }
        Ok(result?)
    }

    #[instrument(skip_all, fields(mode = ?options.mode))]
    pub async fn run(&self, options: RunOptions, cancel: &CancellationToken) -> Result<RunReport, RunError> {
        let parts = &self.parts;
        let mut ledger = Ledger::open(parts.ledger.clone())
            .await?
            .with_legacy(self.legacy.clone());

        // Key source first: without it there is nothing to do, so the target
        // platform is never contacted.
        let key_source_session = self.sign_in_key_source(options.mode, cancel).await?;

        let target_session = TargetAuthenticator::new(
            parts.target.clone(),
            parts.sessions.clone(),
            parts.operator.clone(),
            parts.config.auth.clone(),
            options.mode,
        )
        .authenticate(cancel)
        .await
        .map_err(|failure| RunError::Auth {
            provider: Provider::TargetPlatform,
            failure,
        })?;

        let api_key = match options.api_key.clone().filter(|k| !k.trim().is_empty()) {
            Some(key) => Some(key),
            None if options.mode == RunMode::Interactive => match parts.operator.api_key().await {
                Ok(key) => key,
                Err(e) => {
                    warn!(error = %e, "Could not read web API key");
                    None
                }
            },
            None => None,
        };

        let mut aggregator = InventoryAggregator::new(parts.key_source.clone(), parts.config.inventory.clone());
        if let Some(orders) = options.orders.clone() {
            aggregator = aggregator.restrict_to(orders);
        }
        let fetcher = CatalogFetcher::new(parts.target.clone());
        let (inventory, catalog) = tokio::join!(
            aggregator.fetch_all_keys(key_source_session.clone(), cancel),
            fetcher.fetch_owned_catalog(&target_session, api_key.as_deref()),
        );
        if matches!(inventory, Err(AggregationError::SessionExpired)) {
            self.discard_session(Provider::KeySource).await;
        }
        if matches!(catalog, Err(CatalogError::SessionExpired)) {
            self.discard_session(Provider::TargetPlatform).await;
        }
        let inventory = inventory?;
        let catalog = catalog?;
        if cancel.is_cancelled() {
            return Err(RunError::Cancelled);
        }

        let matcher = OwnershipMatcher::new(parts.config.matching.clone());
        let matches = matcher.match_keys(&inventory.keys, &catalog);
        let mut counts = MatchCounts::default();
        for result in matches.iter() {
            match result.verdict {
                OwnershipVerdict::OwnedConfident => counts.confident += 1,
                OwnershipVerdict::OwnedFuzzy(_) => counts.fuzzy += 1,
                OwnershipVerdict::NotOwned => counts.not_owned += 1,
                OwnershipVerdict::Unknown => counts.unknown += 1,
            }
        }
        info!(
            keys = inventory.keys.len(),
            confident = counts.confident,
            fuzzy = counts.fuzzy,
            not_owned = counts.not_owned,
            unknown = counts.unknown,
            "Ownership matched"
        );

        let mut controller = RedemptionController::new(
            parts.key_source.clone(),
            parts.target.clone(),
            parts.config.redemption.clone(),
            parts.config.matching.redemption_safe_threshold,
        )
        .with_gate(self.gate.clone());
        if let Some(events) = &self.events {
            controller = controller.with_events(events.clone());
        }

        let sessions = Sessions {
            key_source: key_source_session,
            target: target_session,
        };
        let policy = RedemptionPolicy {
            reveal_all: options.reveal_all,
            wait_out_cooldown: options.wait_out_cooldown,
        };

        let keys_found = inventory.keys.len();
        let summary = controller
            .run(&sessions, inventory.keys, &matches, &mut ledger, policy, cancel)
            .await?;

        if let Some(HaltReason::SessionExpired(provider)) = summary.halted {
            self.discard_session(provider).await;
        }

        Ok(RunReport {
            keys_found,
            orders_total: inventory.orders_total,
            orders_failed: inventory.failed_orders.len(),
            catalog_unavailable: match &catalog {
                crate::catalog::CatalogSnapshot::Unavailable(reason) => Some(reason.clone()),
                crate::catalog::CatalogSnapshot::Available(_) => None,
            },
            matches: counts,
            summary,
        })
    }
}

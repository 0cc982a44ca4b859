use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::cooldown::CooldownGate;
use super::outcome::{Classified, RedemptionOutcome, classify_activation};
use super::summary::{HaltReason, KeyDisposition, KeyReport, RunSummary};
use crate::config::RedemptionConfig;
use crate::keys::{GiftToken, KeyRecord, is_valid_product_key};
use crate::ledger::{Ledger, LedgerEntry, LedgerError};
use crate::ownership::{OwnershipMatches, OwnershipVerdict, fold};
use crate::remote::{KeySourceClient, RemoteError, TargetPlatformClient};
use crate::session::{Provider, Session};

/// Progress notifications for whoever drives the run.
#[derive(Debug, Clone)]
pub enum RedemptionEvent {
    Started { total: usize },
    Revealing { key_id: String, title: String },
    Activating { key_id: String, title: String },
    KeyFinished(KeyReport),
    CooldownStarted { until: DateTime<Utc> },
    CooldownWaiting { until: DateTime<Utc>, remaining: Duration },
    CooldownEnded,
    Halted(HaltReason),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RedemptionPolicy {
    /// Reveal unrevealed keys even when ownership is unknown.
    pub reveal_all: bool,
    /// Sleep through rate-limit cooldowns instead of stopping.
    pub wait_out_cooldown: bool,
}

/// Both authenticated sessions.
#[derive(Debug, Clone)]
pub struct Sessions {
    pub key_source: Arc<Session>,
    pub target: Arc<Session>,
}

/// Games handled earlier in the run, by folded title and app id.
#[derive(Default)]
struct SeenGames {
    titles: HashSet<String>,
    apps: HashSet<u64>,
}

impl SeenGames {
    fn contains(&self, key: &KeyRecord) -> bool {
        self.titles.contains(&fold(&key.title))
            || key.target_app_id.is_some_and(|id| self.apps.contains(&id))
    }

    fn insert(&mut self, key: &KeyRecord) {
        self.titles.insert(fold(&key.title));
        if let Some(id) = key.target_app_id {
            self.apps.insert(id);
        }
    }
}

enum Reveal {
    Code(String),
    Failed(String),
    Unauthorized,
    Cancelled,
}

enum Activation {
    Outcome {
        outcome: RedemptionOutcome,
        code: Option<i64>,
        detail: String,
    },
    Unauthorized,
    Cancelled,
}

/// Redeems keys one at a time and records every outcome.
pub struct RedemptionController {
    key_source: Arc<dyn KeySourceClient>,
    target: Arc<dyn TargetPlatformClient>,
    config: RedemptionConfig,
    safe_threshold: f64,
    gate: CooldownGate,
    events: Option<mpsc::UnboundedSender<RedemptionEvent>>,
}

impl RedemptionController {
    pub fn new(
        key_source: Arc<dyn KeySourceClient>,
        target: Arc<dyn TargetPlatformClient>,
        config: RedemptionConfig,
        safe_threshold: f64,
    ) -> Self {
        Self {
            key_source,
            target,
            config,
            safe_threshold,
            gate: CooldownGate::new(),
            events: None,
        }
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<RedemptionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Share a cooldown gate with other redemption paths.
    pub fn with_gate(mut self, gate: CooldownGate) -> Self {
        self.gate = gate;
        self
    }

    pub fn gate(&self) -> &CooldownGate {
        &self.gate
    }

    fn emit(&self, event: RedemptionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Process `keys` in order.
    ///
    /// Only a ledger write failure is an error: once an outcome cannot be
    /// made durable, carrying on would risk redeeming keys twice.
    #[instrument(skip_all, fields(keys = keys.len()))]
    pub async fn run(
        &self,
        sessions: &Sessions,
        keys: Vec<KeyRecord>,
        matches: &OwnershipMatches,
        ledger: &mut Ledger,
        policy: RedemptionPolicy,
        cancel: &CancellationToken,
    ) -> Result<RunSummary, LedgerError> {
        let mut summary = RunSummary::default();
        let mut seen = SeenGames::default();
        self.emit(RedemptionEvent::Started { total: keys.len() });

        for key in &keys {
            if matches!(
                ledger.settled_outcome(key),
                Some(RedemptionOutcome::Redeemed | RedemptionOutcome::AlreadyOwnedElsewhere)
            ) {
                seen.insert(key);
            }
        }

        for key in keys {
            if summary.halted.is_none() {
                if cancel.is_cancelled() {
                    self.halt(&mut summary, HaltReason::Cancelled);
                } else if self.gate.is_engaged() {
                    if !policy.wait_out_cooldown {
                        summary.cooldown_until = self.gate.engaged_until();
                        self.halt(&mut summary, HaltReason::RateLimited);
                    } else if !self.wait_out_cooldown(cancel).await {
                        self.halt(&mut summary, HaltReason::Cancelled);
                    }
                }
            }

            if summary.halted.is_some() {
                self.report(&mut summary, &key, KeyDisposition::NotAttempted, None);
                continue;
            }

            self.process_key(key, sessions, matches, ledger, policy, &mut seen, &mut summary, cancel)
                .await?;
        }

        info!(
            redeemed = summary.redeemed(),
            settled = summary.settled(),
            not_attempted = summary.not_attempted(),
            halted = ?summary.halted,
            "Redemption pass finished"
        );
        Ok(summary)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_key(
        &self,
        key: KeyRecord,
        sessions: &Sessions,
        matches: &OwnershipMatches,
        ledger: &mut Ledger,
        policy: RedemptionPolicy,
        seen: &mut SeenGames,
        summary: &mut RunSummary,
        cancel: &CancellationToken,
    ) -> Result<(), LedgerError> {
        if let Some(outcome) = ledger.settled_outcome(&key) {
            debug!(key = %key.id, %outcome, "Already settled");
            self.report(summary, &key, KeyDisposition::Settled(outcome), None);
            return Ok(());
        }

        if seen.contains(&key) {
            info!(key = %key.id, title = %key.title, "Duplicate of a game handled this run");
            let entry = LedgerEntry::new(&key, RedemptionOutcome::AlreadyOwnedElsewhere)
                .with_detail("duplicate");
            ledger.record(entry).await?;
            self.report(summary, &key, KeyDisposition::SkippedDuplicate, Some("duplicate".to_string()));
            return Ok(());
        }

        let verdict = matches.verdict(&key.id);
        if verdict.blocks_redemption(self.safe_threshold) {
            let detail = match matches.get(&key.id).and_then(|r| r.matched.as_ref()) {
                Some(m) => format!("owned as \"{}\" ({})", m.title, m.app_id),
                None => "owned".to_string(),
            };
            info!(key = %key.id, title = %key.title, %detail, "Skipping owned game");
            let entry = LedgerEntry::new(&key, RedemptionOutcome::AlreadyOwnedElsewhere)
                .with_detail(detail.clone());
            ledger.record(entry).await?;
            seen.insert(&key);
            self.report(summary, &key, KeyDisposition::SkippedOwned(verdict), Some(detail));
            return Ok(());
        }

        if !key.is_revealed()
            && !policy.reveal_all
            && !matches.has_ownership_data()
            && matches!(verdict, OwnershipVerdict::Unknown | OwnershipVerdict::NotOwned)
        {
            debug!(key = %key.id, "Leaving unrevealed: ownership unknown");
            self.report(summary, &key, KeyDisposition::SkippedPending, None);
            return Ok(());
        }

        let key = match key.gift().cloned() {
            None => key,
            Some(gift) => {
                self.emit(RedemptionEvent::Revealing {
                    key_id: key.id.clone(),
                    title: key.title.clone(),
                });
                match self.reveal(&key, &gift, &sessions.key_source, cancel).await {
                    Reveal::Code(code) => key.into_revealed(code),
                    Reveal::Failed(detail) => {
                        return self
                            .record(ledger, summary, &key, RedemptionOutcome::TransientError, None, detail)
                            .await;
                    }
                    Reveal::Unauthorized => {
                        sessions.key_source.mark_expired();
                        self.report(summary, &key, KeyDisposition::NotAttempted, None);
                        self.halt(summary, HaltReason::SessionExpired(Provider::KeySource));
                        return Ok(());
                    }
                    Reveal::Cancelled => {
                        self.report(summary, &key, KeyDisposition::NotAttempted, None);
                        self.halt(summary, HaltReason::Cancelled);
                        return Ok(());
                    }
                }
            }
        };

        let code = key.code().unwrap_or_default().to_string();
        if !is_valid_product_key(&code) {
            warn!(key = %key.id, title = %key.title, "Revealed value is not a product key");
            return self
                .record(
                    ledger,
                    summary,
                    &key,
                    RedemptionOutcome::InvalidOrRegionLocked,
                    None,
                    "malformed key".to_string(),
                )
                .await;
        }

        loop {
            self.emit(RedemptionEvent::Activating {
                key_id: key.id.clone(),
                title: key.title.clone(),
            });

            match self.activate(&code, &sessions.target, cancel).await {
                Activation::Unauthorized => {
                    sessions.target.mark_expired();
                    self.report(summary, &key, KeyDisposition::NotAttempted, None);
                    self.halt(summary, HaltReason::SessionExpired(Provider::TargetPlatform));
                    return Ok(());
                }
                Activation::Cancelled => {
                    self.report(summary, &key, KeyDisposition::NotAttempted, None);
                    self.halt(summary, HaltReason::Cancelled);
                    return Ok(());
                }
                Activation::Outcome {
                    outcome: RedemptionOutcome::RateLimited,
                    code: result_code,
                    detail,
                } => {
                    let until = self.gate.engage(self.config.cooldown());
                    summary.cooldown_until = Some(until);
                    warn!(key = %key.id, %until, "Rate limited by {}", Provider::TargetPlatform);
                    self.emit(RedemptionEvent::CooldownStarted { until });

                    let entry = LedgerEntry::new(&key, RedemptionOutcome::RateLimited)
                        .with_code(result_code)
                        .with_detail(detail.clone());
                    ledger.record(entry).await?;

                    if policy.wait_out_cooldown {
                        if self.wait_out_cooldown(cancel).await {
                            continue;
                        }
                        self.report(
                            summary,
                            &key,
                            KeyDisposition::Attempted(RedemptionOutcome::RateLimited),
                            Some(detail),
                        );
                        self.halt(summary, HaltReason::Cancelled);
                    } else {
                        self.report(
                            summary,
                            &key,
                            KeyDisposition::Attempted(RedemptionOutcome::RateLimited),
                            Some(detail),
                        );
                        self.halt(summary, HaltReason::RateLimited);
                    }
                    return Ok(());
                }
                Activation::Outcome {
                    outcome,
                    code: result_code,
                    detail,
                } => {
                    if matches!(
                        outcome,
                        RedemptionOutcome::Redeemed | RedemptionOutcome::AlreadyOwnedElsewhere
                    ) {
                        seen.insert(&key);
                    }
                    return self
                        .record(ledger, summary, &key, outcome, result_code, detail)
                        .await;
                }
            }
        }
    }

    async fn reveal(
        &self,
        key: &KeyRecord,
        gift: &GiftToken,
        session: &Session,
        cancel: &CancellationToken,
    ) -> Reveal {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let failure = match self.key_source.reveal_key(session, &key.order_id, gift).await {
                Ok(code) => {
                    info!(key = %key.id, title = %key.title, "Revealed key");
                    return Reveal::Code(code);
                }
                Err(RemoteError::Unauthorized) => return Reveal::Unauthorized,
                Err(e) => e.to_string(),
            };

            if !retry.should_retry(attempt) {
                return Reveal::Failed(format!("reveal failed: {}", failure));
            }
            attempt += 1;
            warn!(key = %key.id, attempt, error = %failure, "Reveal failed, retrying");
            if !retry.backoff(attempt, cancel).await {
                return Reveal::Cancelled;
            }
        }
    }

    async fn activate(&self, code: &str, session: &Session, cancel: &CancellationToken) -> Activation {
        let retry = &self.config.retry;
        let mut attempt = 0;
        loop {
            let failure = match self.target.activate(session, code).await {
                Ok(response) => match classify_activation(&response) {
                    Classified::Final {
                        outcome,
                        code,
                        detail,
                    } => return Activation::Outcome { outcome, code, detail },
                    Classified::Ambiguous(body) => {
                        let snippet: String = body.chars().take(120).collect();
                        format!("unrecognised activation response: {}", snippet)
                    }
                },
                Err(RemoteError::Unauthorized) => return Activation::Unauthorized,
                Err(e) => e.to_string(),
            };

            if !retry.should_retry(attempt) {
                return Activation::Outcome {
                    outcome: RedemptionOutcome::TransientError,
                    code: None,
                    detail: failure,
                };
            }
            attempt += 1;
            warn!(attempt, error = %failure, "Activation failed, retrying");
            if !retry.backoff(attempt, cancel).await {
                return Activation::Cancelled;
            }
        }
    }

    /// Sleep until the gate opens. Returns `false` if cancelled first.
    async fn wait_out_cooldown(&self, cancel: &CancellationToken) -> bool {
        while let (Some(remaining), Some(until)) = (self.gate.remaining(), self.gate.engaged_until()) {
            info!(%until, "Waiting out rate-limit cooldown");
            self.emit(RedemptionEvent::CooldownWaiting { until, remaining });
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(remaining) => {}
            }
        }
        self.gate.release();
        self.emit(RedemptionEvent::CooldownEnded);
        true
    }

    async fn record(
        &self,
        ledger: &mut Ledger,
        summary: &mut RunSummary,
        key: &KeyRecord,
        outcome: RedemptionOutcome,
        code: Option<i64>,
        detail: String,
    ) -> Result<(), LedgerError> {
        info!(key = %key.id, title = %key.title, %outcome, %detail, "Redemption outcome");
        let entry = LedgerEntry::new(key, outcome)
            .with_code(code)
            .with_detail(detail.clone());
        ledger.record(entry).await?;
        self.report(summary, key, KeyDisposition::Attempted(outcome), Some(detail));
        Ok(())
    }

    fn report(
        &self,
        summary: &mut RunSummary,
        key: &KeyRecord,
        disposition: KeyDisposition,
        detail: Option<String>,
    ) {
        let report = KeyReport {
            key_id: key.id.clone(),
            title: key.title.clone(),
            disposition,
            detail,
        };
        self.emit(RedemptionEvent::KeyFinished(report.clone()));
        summary.reports.push(report);
    }

    fn halt(&self, summary: &mut RunSummary, reason: HaltReason) {
        if summary.halted.is_none() {
            warn!(%reason, "Redemption halted");
            summary.halted = Some(reason);
            self.emit(RedemptionEvent::Halted(reason));
        }
    }
}

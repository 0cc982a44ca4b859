//! End-to-end runs through [`Redeemer`].

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;

use common::*;
use keyferry::auth::AuthFailure;
use keyferry::choice::{ChoiceError, SelectionError};
use keyferry::ledger::{LegacyEntry, MemoryLedgerStore};
use keyferry::ownership::OwnershipVerdict;
use keyferry::redemption::{HaltReason, KeyDisposition, RedemptionEvent, RedemptionOutcome, codes};
use keyferry::remote::{ActivationResponse, RemoteError};
use keyferry::session::{MemorySessionStore, Provider};
use keyferry::{ExitStatus, Redeemer, RedeemerParts, RunError, RunMode, RunOptions};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct World {
    key_source: Arc<FakeKeySource>,
    target: Arc<FakeTarget>,
    sessions: Arc<MemorySessionStore>,
    ledger: Arc<MemoryLedgerStore>,
    operator: Arc<ScriptedOperator>,
}

impl World {
    fn new(key_source: FakeKeySource) -> Self {
        Self {
            key_source: Arc::new(key_source),
            target: Arc::new(FakeTarget::new()),
            sessions: Arc::new(
                MemorySessionStore::new()
                    .with_session(key_source_session())
                    .with_session(target_session()),
            ),
            ledger: Arc::new(MemoryLedgerStore::new()),
            operator: Arc::new(ScriptedOperator::new()),
        }
    }

    fn redeemer(&self) -> Redeemer {
        Redeemer::new(RedeemerParts {
            key_source: self.key_source.clone(),
            target: self.target.clone(),
            sessions: self.sessions.clone(),
            ledger: self.ledger.clone(),
            operator: self.operator.clone(),
            config: test_config(),
        })
    }
}

fn options(mode: RunMode) -> RunOptions {
    RunOptions {
        mode,
        api_key: Some("API-KEY".to_string()),
        ..RunOptions::default()
    }
}

mod run_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_run_skips_owned_and_redeems_the_rest() {
        let owned = unrevealed("order1", 0, "Game X");
        let fresh = unrevealed("order2", 0, "Brand New Game");
        let world = World::new(
            FakeKeySource::new().with_orders(vec![("order1", vec![owned.clone()]), ("order2", vec![fresh.clone()])]),
        );
        world.target.own(&[(10, "Game X - Deluxe Edition")]);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let report = world
            .redeemer()
            .with_events(tx)
            .run(options(RunMode::Unattended), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.exit_status(), ExitStatus::Success);
        assert_eq!(report.keys_found, 2);
        assert_eq!(report.orders_total, 2);
        assert_eq!(report.catalog_unavailable, None);
        assert_eq!(report.matches.fuzzy, 1);
        assert!(matches!(
            report.summary.report_for(&owned.id).unwrap().disposition,
            KeyDisposition::SkippedOwned(OwnershipVerdict::OwnedFuzzy(_))
        ));
        assert_eq!(report.summary.redeemed(), 1);
        assert_eq!(*world.key_source.reveals.lock(), vec![fresh.id.clone()]);
        assert_eq!(world.ledger.snapshot().len(), 2);

        let mut finished = 0;
        while let Ok(event) = rx.try_recv() {
            if matches!(event, RedemptionEvent::KeyFinished(_)) {
                finished += 1;
            }
        }
        assert_eq!(finished, 2);
    }

    #[tokio::test]
    async fn test_unattended_expired_key_source_never_touches_target() {
        let world = World::new(FakeKeySource::new().with_orders(vec![("order1", vec![unrevealed("order1", 0, "A")])]));
        world.key_source.set_probe(Ok(false));

        let err = world
            .redeemer()
            .run(options(RunMode::Unattended), &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RunError::Auth {
                provider: Provider::KeySource,
                failure: AuthFailure::SessionRequired(Provider::KeySource),
            }
        ));
        assert_eq!(err.exit_status(), ExitStatus::SessionRequired);
        assert_eq!(err.exit_status().code(), 3);
        assert_eq!(world.target.calls.load(Ordering::SeqCst), 0);
        assert!(!world.sessions.contains(Provider::KeySource));
    }

    #[tokio::test]
    async fn test_rate_limit_exit_status() {
        let keys: Vec<_> = (1..=3)
            .map(|i| revealed(&format!("order{}", i), 0, &format!("Game {}", i), &product_key(100 + i)))
            .collect();
        let world = World::new(FakeKeySource::new().with_orders(
            keys.iter()
                .map(|k| (k.order_id.as_str(), vec![k.clone()]))
                .collect(),
        ));
        world.target.own(&[]);
        world.target.script_activation(
            &product_key(101),
            vec![Ok(ActivationResponse::Failed {
                code: codes::RATE_LIMITED,
            })],
        );

        let redeemer = world.redeemer();
        let report = redeemer
            .run(options(RunMode::Unattended), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.summary.halted, Some(HaltReason::RateLimited));
        assert_eq!(report.exit_status(), ExitStatus::CooldownPending);
        assert_eq!(report.exit_status().code(), 75);
        assert_eq!(report.summary.not_attempted(), 2);
        assert!(redeemer.cooldown_gate().is_engaged());
    }

    #[tokio::test]
    async fn test_without_api_key_unrevealed_keys_wait() {
        let hidden = unrevealed("order1", 0, "Hidden Game");
        let world = World::new(FakeKeySource::new().with_orders(vec![("order1", vec![hidden])]));

        let report = world
            .redeemer()
            .run(
                RunOptions {
                    mode: RunMode::Unattended,
                    ..RunOptions::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert!(report.catalog_unavailable.is_some());
        assert_eq!(report.matches.unknown, 1);
        assert_eq!(report.summary.skipped_pending_titles(), vec!["Hidden Game"]);
        assert_eq!(world.key_source.reveal_count(), 0);
        assert!(world.ledger.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_interactive_asks_for_api_key() {
        let world = World::new(FakeKeySource::new().with_orders(vec![(
            "order1",
            vec![unrevealed("order1", 0, "Fresh Game")],
        )]));
        world.target.own(&[(5, "Old Game")]);
        *world.operator.api_key.lock() = Some("FROM-PROMPT".to_string());

        let report = world
            .redeemer()
            .run(
                RunOptions {
                    mode: RunMode::Interactive,
                    ..RunOptions::default()
                },
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.catalog_unavailable, None);
        assert_eq!(report.summary.redeemed(), 1);
    }

    #[tokio::test]
    async fn test_legacy_exports_settle_keys() {
        let key = revealed("order1", 0, "Old Favourite", &product_key(7));
        let world = World::new(FakeKeySource::new().with_orders(vec![("order1", vec![key.clone()])]));
        world.target.own(&[]);

        let report = world
            .redeemer()
            .with_legacy(vec![LegacyEntry {
                order_id: "order1".to_string(),
                title: keyferry::ledger::fold_legacy_title("Old Favourite"),
                outcome: RedemptionOutcome::Redeemed,
            }])
            .run(options(RunMode::Unattended), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            report.summary.report_for(&key.id).unwrap().disposition,
            KeyDisposition::Settled(RedemptionOutcome::Redeemed)
        );
        assert_eq!(world.target.activation_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_target_session_is_discarded() {
        let key = revealed("order1", 0, "Some Game", &product_key(1));
        let world = World::new(FakeKeySource::new().with_orders(vec![("order1", vec![key])]));
        world.target.own(&[]);
        world
            .target
            .script_activation(&product_key(1), vec![Err(RemoteError::Unauthorized)]);

        let report = world
            .redeemer()
            .run(options(RunMode::Unattended), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.exit_status(), ExitStatus::SessionRequired);
        assert!(!world.sessions.contains(Provider::TargetPlatform));
        assert!(world.sessions.contains(Provider::KeySource));
    }

    #[tokio::test]
    async fn test_inventory_session_expiry_fails_the_run() {
        let world = World::new(FakeKeySource::new().with_orders(vec![(
            "order1",
            vec![unrevealed("order1", 0, "A")],
        )]));
        world.key_source.fail_order(0, RemoteError::Unauthorized);

        let err = world
            .redeemer()
            .run(options(RunMode::Unattended), &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err.exit_status(), ExitStatus::SessionRequired);
        assert_eq!(world.target.activation_count(), 0);
        assert!(!world.sessions.contains(Provider::KeySource));
        assert!(world.sessions.contains(Provider::TargetPlatform));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let world = World::new(FakeKeySource::new());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = world.redeemer().run(options(RunMode::Unattended), &cancel).await;
        let status = match result {
            Ok(report) => report.exit_status(),
            Err(err) => err.exit_status(),
        };
        assert_eq!(status, ExitStatus::Interrupted);
    }
}

mod choice_tests {
    use super::*;

    fn month_world() -> World {
        let world = World::new(FakeKeySource::new().with_orders(vec![
            ("order1", vec![unrevealed("order1", 0, "Older Game")]),
            ("month1", vec![]),
        ]));
        world.key_source.add_choice_month(
            "month1",
            2,
            &[("Starfall Tactics", true), ("Harbor Lights", true), ("Browser Quest", false)],
        );
        world.target.own(&[(5, "Old Game")]);
        world
    }

    #[tokio::test]
    async fn test_claimed_games_are_redeemed_from_their_month_only() {
        let world = month_world();
        let redeemer = world.redeemer();
        let cancel = CancellationToken::new();

        let session = redeemer.sign_in_key_source(RunMode::Unattended, &cancel).await.unwrap();
        let months = redeemer.choice_months(&session).await.unwrap();
        assert_eq!(months.len(), 1);
        assert_eq!(months[0].options.len(), 3);

        let outcome = redeemer.choose(&session, &months[0], &[2, 0], &cancel).await.unwrap();
        assert_eq!(outcome.claimed, vec!["Starfall Tactics"]);
        assert_eq!(outcome.on_website.len(), 1);
        assert_eq!(outcome.on_website[0].title, "Browser Quest");
        assert!(outcome.failed.is_empty());
        assert_eq!(*world.key_source.claims.lock(), vec!["starfall_tactics"]);

        let report = redeemer
            .run(
                RunOptions {
                    orders: Some(vec![outcome.order_id.clone()]),
                    ..options(RunMode::Unattended)
                },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(report.orders_total, 1);
        assert_eq!(report.keys_found, 1);
        assert_eq!(report.summary.redeemed(), 1);
        assert_eq!(*world.key_source.reveals.lock(), vec!["month1:game_100:100".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_claim_does_not_stop_the_month() {
        let world = month_world();
        world
            .key_source
            .choose_errors
            .lock()
            .insert("starfall_tactics".to_string(), RemoteError::Protocol("already chosen".into()));
        let redeemer = world.redeemer();
        let cancel = CancellationToken::new();

        let session = redeemer.sign_in_key_source(RunMode::Unattended, &cancel).await.unwrap();
        let months = redeemer.choice_months(&session).await.unwrap();
        let outcome = redeemer.choose(&session, &months[0], &[0, 1], &cancel).await.unwrap();

        assert_eq!(outcome.claimed, vec!["Harbor Lights"]);
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "Starfall Tactics");
    }

    #[tokio::test]
    async fn test_too_many_picks_claim_nothing() {
        let world = month_world();
        let redeemer = world.redeemer();
        let cancel = CancellationToken::new();

        let session = redeemer.sign_in_key_source(RunMode::Unattended, &cancel).await.unwrap();
        let months = redeemer.choice_months(&session).await.unwrap();
        let err = redeemer.choose(&session, &months[0], &[0, 1, 2], &cancel).await.unwrap_err();

        assert!(matches!(
            err,
            RunError::Choice(ChoiceError::Selection(SelectionError::TooMany { picked: 3, remaining: 2 }))
        ));
        assert_eq!(err.exit_status(), ExitStatus::Failure);
        assert!(world.key_source.claims.lock().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_session_while_listing_months_is_discarded() {
        let world = month_world();
        *world.key_source.choice_error.lock() = Some(RemoteError::Unauthorized);
        let redeemer = world.redeemer();
        let cancel = CancellationToken::new();

        let session = redeemer.sign_in_key_source(RunMode::Unattended, &cancel).await.unwrap();
        let err = redeemer.choice_months(&session).await.unwrap_err();

        assert!(matches!(err, RunError::Choice(ChoiceError::SessionExpired)));
        assert_eq!(err.exit_status(), ExitStatus::SessionRequired);
        assert!(!world.sessions.contains(Provider::KeySource));
        assert!(world.sessions.contains(Provider::TargetPlatform));
    }
}

//! Sign-in flows for both services.

mod common;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use keyferry::RunMode;
use keyferry::auth::{
    AuthFailure, KeySourceAuthState, KeySourceAuthenticator, Notice, TargetAuthState,
    TargetAuthenticator,
};
use keyferry::config::AuthConfig;
use keyferry::remote::{
    GuardCodeStatus, GuardKind, LoginRejection, LoginStep, PendingLogin, PollHandle, PollStatus, QrChallenge,
    RemoteError, SecondFactorKind,
};
use keyferry::session::{MemorySessionStore, Provider, SessionState};
use tokio_util::sync::CancellationToken;

fn key_source_auth(
    client: &Arc<FakeKeySource>,
    store: &Arc<MemorySessionStore>,
    operator: &Arc<ScriptedOperator>,
    mode: RunMode,
) -> KeySourceAuthenticator {
    KeySourceAuthenticator::new(
        client.clone(),
        store.clone(),
        operator.clone(),
        AuthConfig::default(),
        mode,
    )
}

fn target_auth(
    client: &Arc<FakeTarget>,
    store: &Arc<MemorySessionStore>,
    operator: &Arc<ScriptedOperator>,
    mode: RunMode,
) -> TargetAuthenticator {
    TargetAuthenticator::new(
        client.clone(),
        store.clone(),
        operator.clone(),
        AuthConfig::default(),
        mode,
    )
}

fn pending_email() -> PendingLogin {
    PendingLogin {
        kind: SecondFactorKind::EmailCode,
        state: "pending".to_string(),
    }
}

mod key_source_tests {
    use super::*;

    #[tokio::test]
    async fn test_resumes_saved_session_without_prompting() {
        let client = Arc::new(FakeKeySource::new());
        let store = Arc::new(MemorySessionStore::new().with_session(key_source_session()));
        let operator = Arc::new(ScriptedOperator::new());

        let mut auth = key_source_auth(&client, &store, &operator, RunMode::Unattended);
        let session = auth.authenticate(&CancellationToken::new()).await.unwrap();

        assert_eq!(session.state(), SessionState::ValidInUse);
        assert_eq!(*auth.state(), KeySourceAuthState::Authenticated);
        assert_eq!(client.probe_calls.load(Ordering::SeqCst), 1);
        assert_eq!(operator.credential_prompts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_session_unattended() {
        let client = Arc::new(FakeKeySource::new());
        client.set_probe(Ok(false));
        let store = Arc::new(MemorySessionStore::new().with_session(key_source_session()));
        let operator = Arc::new(ScriptedOperator::new());

        let mut auth = key_source_auth(&client, &store, &operator, RunMode::Unattended);
        let err = auth.authenticate(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, AuthFailure::SessionRequired(Provider::KeySource));
        assert!(!store.contains(Provider::KeySource));
        assert_eq!(operator.credential_prompts.load(Ordering::SeqCst), 0);
        assert_eq!(client.credential_submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unreachable_provider_is_not_expiry() {
        let client = Arc::new(FakeKeySource::new());
        client.set_probe(Err(RemoteError::Transport("dns failure".to_string())));
        let store = Arc::new(MemorySessionStore::new().with_session(key_source_session()));
        let operator = Arc::new(ScriptedOperator::new());

        let mut auth = key_source_auth(&client, &store, &operator, RunMode::Interactive);
        let err = auth.authenticate(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, AuthFailure::ProviderUnavailable(_)));
        assert!(store.contains(Provider::KeySource));
    }

    #[tokio::test]
    async fn test_login_with_second_factor_retry() {
        let client = Arc::new(FakeKeySource::new());
        client.push_login_step(Ok(LoginStep::SecondFactorRequired(pending_email())));
        client.push_login_step(Ok(LoginStep::Rejected(LoginRejection::InvalidCode(pending_email()))));
        client.push_login_step(Ok(LoginStep::Authenticated(key_source_session())));
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());
        operator.push_credentials("alice@example.com", "hunter2");
        operator.push_code("111111");
        operator.push_code(" 222222 ");

        let mut auth = key_source_auth(&client, &store, &operator, RunMode::Interactive);
        let session = auth.authenticate(&CancellationToken::new()).await.unwrap();

        assert_eq!(session.provider(), Provider::KeySource);
        assert!(store.contains(Provider::KeySource));
        assert_eq!(*client.submitted_codes.lock(), vec!["111111", "222222"]);
        assert_eq!(operator.notices(), vec![Notice::CodeRejected]);
        assert_eq!(
            *operator.code_prompts.lock(),
            vec![SecondFactorKind::EmailCode, SecondFactorKind::EmailCode]
        );
    }

    #[tokio::test]
    async fn test_bad_credentials_exhaust_attempts() {
        let client = Arc::new(FakeKeySource::new());
        let operator = Arc::new(ScriptedOperator::new());
        for _ in 0..3 {
            client.push_login_step(Ok(LoginStep::Rejected(LoginRejection::BadCredentials(
                "wrong password".to_string(),
            ))));
            operator.push_credentials("alice@example.com", "wrong");
        }
        let store = Arc::new(MemorySessionStore::new());

        let mut auth = key_source_auth(&client, &store, &operator, RunMode::Interactive);
        let err = auth.authenticate(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, AuthFailure::BadCredentials);
        assert_eq!(client.credential_submissions.load(Ordering::SeqCst), 3);
        assert_eq!(
            operator.notices(),
            vec![Notice::CredentialsRejected, Notice::CredentialsRejected]
        );
        assert_eq!(*auth.state(), KeySourceAuthState::Failed(AuthFailure::BadCredentials));
        assert!(!store.contains(Provider::KeySource));
    }

    #[tokio::test]
    async fn test_declined_prompt_cancels() {
        let client = Arc::new(FakeKeySource::new());
        let operator = Arc::new(ScriptedOperator::new());
        operator.decline_credentials();
        let store = Arc::new(MemorySessionStore::new());

        let mut auth = key_source_auth(&client, &store, &operator, RunMode::Interactive);
        let err = auth.authenticate(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, AuthFailure::Cancelled);
        assert_eq!(client.credential_submissions.load(Ordering::SeqCst), 0);
    }
}

mod target_tests {
    use super::*;

    #[tokio::test]
    async fn test_unattended_without_session_makes_no_calls() {
        let client = Arc::new(FakeTarget::new());
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());

        let auth = target_auth(&client, &store, &operator, RunMode::Unattended);
        let err = auth.authenticate(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, AuthFailure::SessionRequired(Provider::TargetPlatform));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_resumes_saved_session() {
        let client = Arc::new(FakeTarget::new());
        let store = Arc::new(MemorySessionStore::new().with_session(target_session()));
        let operator = Arc::new(ScriptedOperator::new());

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        auth.authenticate(&CancellationToken::new()).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert!(operator.challenges.lock().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_qr_approval_wins_the_race() {
        let client = Arc::new(FakeTarget::new());
        client.script_polls(
            QR_CLIENT,
            vec![
                PollStatus::Pending { rotated: None },
                PollStatus::Pending { rotated: None },
                granted("alice"),
            ],
        );
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        let session = auth.authenticate(&CancellationToken::new()).await.unwrap();

        assert_eq!(session.token(), "steamLoginSecure=refresh-alice");
        assert_eq!(auth.state(), TargetAuthState::Authenticated);
        assert!(store.contains(Provider::TargetPlatform));
        assert_eq!(*operator.challenges.lock(), vec![QR_URL.to_string()]);
        // The credential prompt was opened, then abandoned.
        assert_eq!(operator.credential_prompts.load(Ordering::SeqCst), 1);
        assert_eq!(client.password_key_fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rotated_qr_challenge_is_shown_again() {
        let client = Arc::new(FakeTarget::new());
        let rotated = QrChallenge {
            challenge_url: "https://s.team/q/1/67890".to_string(),
            handle: PollHandle {
                client_id: "qr-client-2".to_string(),
                request_id: "qr-request".to_string(),
            },
        };
        client.script_polls(
            QR_CLIENT,
            vec![PollStatus::Pending {
                rotated: Some(rotated),
            }],
        );
        client.script_polls("qr-client-2", vec![granted("alice")]);
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        auth.authenticate(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            *operator.challenges.lock(),
            vec![QR_URL.to_string(), "https://s.team/q/1/67890".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_credentials_with_device_code_win_the_race() {
        let client = Arc::new(FakeTarget::new());
        client
            .credential_results
            .lock()
            .push_back(Some(credential_login(vec![GuardKind::DeviceCode])));
        client.script_polls(CREDENTIAL_CLIENT, vec![granted("alice")]);
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());
        operator.push_credentials("alice", "hunter2");
        operator.push_code(" abc12 ");

        let started = tokio::time::Instant::now();
        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        auth.authenticate(&CancellationToken::new()).await.unwrap();

        assert!(started.elapsed() < AuthConfig::default().qr_max_wait());
        assert_eq!(*client.decrypted_secrets.lock(), vec!["hunter2".to_string()]);
        assert_eq!(
            *client.guard_codes.lock(),
            vec![("ABC12".to_string(), GuardKind::DeviceCode)]
        );
        assert_eq!(
            *operator.code_prompts.lock(),
            vec![SecondFactorKind::AuthenticatorCode]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_password_key_for_every_submission() {
        let client = Arc::new(FakeTarget::new());
        {
            let mut results = client.credential_results.lock();
            results.push_back(None);
            results.push_back(None);
            results.push_back(Some(credential_login(Vec::new())));
        }
        client.script_polls(CREDENTIAL_CLIENT, vec![granted("alice")]);
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());
        operator.push_credentials("alice", "first");
        operator.push_credentials("alice", "second");
        operator.push_credentials("alice", "third");

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        auth.authenticate(&CancellationToken::new()).await.unwrap();

        assert_eq!(client.password_key_fetches.load(Ordering::SeqCst), 3);
        assert_eq!(*client.decrypted_secrets.lock(), vec!["first", "second", "third"]);
        assert_eq!(
            operator.notices(),
            vec![Notice::CredentialsRejected, Notice::CredentialsRejected]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_approval_beats_code_prompt() {
        let client = Arc::new(FakeTarget::new());
        client.credential_results.lock().push_back(Some(credential_login(vec![
            GuardKind::DeviceCode,
            GuardKind::DeviceConfirmation,
        ])));
        client.script_polls(
            CREDENTIAL_CLIENT,
            vec![PollStatus::Pending { rotated: None }, granted("alice")],
        );
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());
        operator.push_credentials("alice", "hunter2");

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        auth.authenticate(&CancellationToken::new()).await.unwrap();

        assert!(client.guard_codes.lock().is_empty());
        assert!(operator.notices().contains(&Notice::ApproveOrEnterCode));
        assert_eq!(operator.code_prompts.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_approval_still_counts_after_rejected_code() {
        let client = Arc::new(FakeTarget::new());
        client.credential_results.lock().push_back(Some(credential_login(vec![
            GuardKind::DeviceCode,
            GuardKind::DeviceConfirmation,
        ])));
        client.guard_replies.lock().push_back(GuardCodeStatus::Rejected);
        client.script_polls(
            CREDENTIAL_CLIENT,
            vec![
                PollStatus::Pending { rotated: None },
                PollStatus::Pending { rotated: None },
                granted("alice"),
            ],
        );
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());
        operator.push_credentials("alice", "hunter2");
        operator.push_code("WRONG");

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        let session = tokio::time::timeout(
            Duration::from_secs(600),
            auth.authenticate(&CancellationToken::new()),
        )
        .await
        .expect("approval on the device was never noticed")
        .unwrap();

        assert_eq!(session.token(), "steamLoginSecure=refresh-alice");
        assert_eq!(
            *client.guard_codes.lock(),
            vec![("WRONG".to_string(), GuardKind::DeviceCode)]
        );
        assert!(operator.notices().contains(&Notice::CodeRejected));
        // The second prompt was opened, then abandoned when approval arrived.
        assert_eq!(
            *operator.code_prompts.lock(),
            vec![SecondFactorKind::AuthenticatorCode, SecondFactorKind::AuthenticatorCode]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_both_paths_failing_reports_most_useful_error() {
        let client = Arc::new(FakeTarget::new());
        client.script_polls(QR_CLIENT, vec![PollStatus::Expired]);
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());
        operator.decline_credentials();

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        let err = auth.authenticate(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, AuthFailure::Timeout);
        assert_eq!(auth.state(), TargetAuthState::Failed(AuthFailure::Timeout));
        assert!(!store.contains(Provider::TargetPlatform));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bad_credentials_outrank_qr_timeout() {
        let client = Arc::new(FakeTarget::new());
        {
            let mut results = client.credential_results.lock();
            for _ in 0..3 {
                results.push_back(None);
            }
        }
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());
        for _ in 0..3 {
            operator.push_credentials("alice", "wrong");
        }

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        let err = auth.authenticate(&CancellationToken::new()).await.unwrap_err();

        assert_eq!(err, AuthFailure::BadCredentials);
    }

    #[tokio::test(start_paused = true)]
    async fn test_external_cancel_stops_both_paths() {
        let client = Arc::new(FakeTarget::new());
        let store = Arc::new(MemorySessionStore::new());
        let operator = Arc::new(ScriptedOperator::new());
        let cancel = CancellationToken::new();
        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            canceller.cancel();
        });

        let auth = target_auth(&client, &store, &operator, RunMode::Interactive);
        let err = auth.authenticate(&cancel).await.unwrap_err();

        assert_eq!(err, AuthFailure::Cancelled);
    }
}

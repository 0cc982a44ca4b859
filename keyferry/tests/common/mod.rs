//! In-memory stand-ins for both services and the operator.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use keyferry::auth::{Notice, Operator, OperatorError};
use keyferry::config::EngineConfig;
use keyferry::keys::{GiftToken, KeyRecord, OrderRef};
use keyferry::redemption::RetryConfig;
use keyferry::remote::{
    ActivationResponse, CatalogApp, CatalogPage, ChoiceMonth, ChoiceOption, CredentialLogin, Credentials, EncryptedSecret,
    GuardCodeStatus, GuardKind, KeySourceClient, LoginGrant, LoginStep, OwnedIds, PasswordKey,
    PendingLogin, PollHandle, PollStatus, QrChallenge, RemoteError, SecondFactorKind, SessionProbe,
    TargetPlatformClient,
};
use keyferry::session::{Provider, Session};

pub const QR_CLIENT: &str = "qr-client";
pub const CREDENTIAL_CLIENT: &str = "credential-client";
pub const QR_URL: &str = "https://s.team/q/1/12345";

/// Engine config with fast, deterministic retries.
pub fn test_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.redemption.retry = RetryConfig {
        retries: 2,
        first_delay_ms: 10,
        delay_cap_ms: 100,
        growth: 2.0,
        jitter: false,
    };
    config
}

pub fn key_source_session() -> Session {
    Session::new(Provider::KeySource, "_simpleauth_sess=test; csrf_cookie=abc")
}

pub fn target_session() -> Session {
    Session::new(Provider::TargetPlatform, "sessionid=0123; steamLoginSecure=test")
}

pub fn unrevealed(order: &str, index: u32, title: &str) -> KeyRecord {
    KeyRecord::unrevealed(order, format!("game_{}", index), index, title)
}

pub fn revealed(order: &str, index: u32, title: &str, code: &str) -> KeyRecord {
    KeyRecord::revealed(order, format!("game_{}", index), index, title, code)
}

/// A well-formed product key derived from `n`.
pub fn product_key(n: usize) -> String {
    format!("{:05}-AAAAA-BBBBB", n)
}

// ---------------------------------------------------------------------------
// Key source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeKeySource {
    pub probe_result: Mutex<Option<Result<bool, RemoteError>>>,
    pub login_steps: Mutex<VecDeque<Result<LoginStep, RemoteError>>>,
    pub submitted_codes: Mutex<Vec<String>>,
    pub list_error: Mutex<Option<RemoteError>>,
    pub orders: Mutex<Vec<(OrderRef, Result<Vec<KeyRecord>, RemoteError>)>>,
    pub fetch_delay: Mutex<Duration>,
    pub reveal_errors: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    pub reveal_values: Mutex<HashMap<String, String>>,
    pub choice_months: Mutex<Vec<ChoiceMonth>>,
    pub choice_error: Mutex<Option<RemoteError>>,
    pub choose_errors: Mutex<HashMap<String, RemoteError>>,
    /// Key added to the month's order when an option is claimed.
    pub unlocks: Mutex<HashMap<String, KeyRecord>>,
    pub claims: Mutex<Vec<String>>,

    pub probe_calls: AtomicUsize,
    pub credential_submissions: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub reveals: Mutex<Vec<String>>,
}

impl FakeKeySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Orders in listing order, each with its keys.
    pub fn with_orders(self, orders: Vec<(&str, Vec<KeyRecord>)>) -> Self {
        *self.orders.lock() = orders
            .into_iter()
            .enumerate()
            .map(|(position, (id, keys))| {
                (
                    OrderRef {
                        id: id.to_string(),
                        position,
                    },
                    Ok(keys),
                )
            })
            .collect();
        self
    }

    pub fn fail_order(&self, position: usize, error: RemoteError) {
        if let Some(entry) = self.orders.lock().get_mut(position) {
            entry.1 = Err(error);
        }
    }

    pub fn set_probe(&self, result: Result<bool, RemoteError>) {
        *self.probe_result.lock() = Some(result);
    }

    pub fn push_login_step(&self, step: Result<LoginStep, RemoteError>) {
        self.login_steps.lock().push_back(step);
    }

    pub fn fail_reveal(&self, key_id: &str, error: RemoteError) {
        self.reveal_errors
            .lock()
            .entry(key_id.to_string())
            .or_default()
            .push_back(error);
    }

    pub fn reveal_as(&self, key_id: &str, value: &str) {
        self.reveal_values
            .lock()
            .insert(key_id.to_string(), value.to_string());
    }

    /// A Choice month whose options each unlock one key in `order_id`.
    pub fn add_choice_month(&self, order_id: &str, remaining: u32, games: &[(&str, bool)]) {
        let options = games
            .iter()
            .map(|(title, claimable)| ChoiceOption {
                id: title.to_lowercase().replace(' ', "_"),
                title: title.to_string(),
                rating: None,
                claim_key: claimable.then(|| order_id.to_string()),
                page_url: format!("https://example.invalid/{}", title),
            })
            .collect::<Vec<_>>();
        for (index, option) in options.iter().enumerate() {
            self.unlocks.lock().insert(
                option.id.clone(),
                unrevealed(order_id, 100 + index as u32, &option.title),
            );
        }
        self.choice_months.lock().push(ChoiceMonth {
            order_id: order_id.to_string(),
            title: format!("Choice {}", order_id),
            remaining,
            offer_id: "initial".to_string(),
            page_url: "https://example.invalid/month".to_string(),
            options,
        });
    }

    pub fn reveal_count(&self) -> usize {
        self.reveals.lock().len()
    }

    fn next_login_step(&self) -> Result<LoginStep, RemoteError> {
        self.login_steps
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::Protocol("no scripted login step".into())))
    }
}

#[async_trait]
impl SessionProbe for FakeKeySource {
    async fn probe(&self, _session: &Session) -> Result<bool, RemoteError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.probe_result.lock().clone().unwrap_or(Ok(true))
    }
}

#[async_trait]
impl KeySourceClient for FakeKeySource {
    async fn submit_credentials(&self, _credentials: &Credentials) -> Result<LoginStep, RemoteError> {
        self.credential_submissions.fetch_add(1, Ordering::SeqCst);
        self.next_login_step()
    }

    async fn submit_second_factor(
        &self,
        _pending: &PendingLogin,
        _credentials: &Credentials,
        code: &str,
    ) -> Result<LoginStep, RemoteError> {
        self.submitted_codes.lock().push(code.to_string());
        self.next_login_step()
    }

    async fn list_orders(&self, _session: &Session) -> Result<Vec<OrderRef>, RemoteError> {
        if let Some(e) = self.list_error.lock().clone() {
            return Err(e);
        }
        Ok(self.orders.lock().iter().map(|(o, _)| o.clone()).collect())
    }

    async fn fetch_order(&self, _session: &Session, order: &OrderRef) -> Result<Vec<KeyRecord>, RemoteError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .orders
            .lock()
            .iter()
            .find(|(o, _)| o.id == order.id)
            .map(|(_, r)| r.clone())
            .unwrap_or_else(|| Err(RemoteError::Protocol("unknown order".into())));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn reveal_key(&self, _session: &Session, order_id: &str, gift: &GiftToken) -> Result<String, RemoteError> {
        let key_id = KeyRecord::make_id(order_id, &gift.machine_name, gift.key_index);
        if let Some(e) = self
            .reveal_errors
            .lock()
            .get_mut(&key_id)
            .and_then(|q| q.pop_front())
        {
            return Err(e);
        }
        let mut reveals = self.reveals.lock();
        reveals.push(key_id.clone());
        let value = self
            .reveal_values
            .lock()
            .get(&key_id)
            .cloned()
            .unwrap_or_else(|| product_key(reveals.len()));
        Ok(value)
    }

    async fn choice_months(&self, _session: &Session) -> Result<Vec<ChoiceMonth>, RemoteError> {
        if let Some(e) = self.choice_error.lock().clone() {
            return Err(e);
        }
        Ok(self.choice_months.lock().clone())
    }

    async fn choose_content(
        &self,
        _session: &Session,
        month: &ChoiceMonth,
        option: &ChoiceOption,
    ) -> Result<(), RemoteError> {
        if let Some(e) = self.choose_errors.lock().get(&option.id).cloned() {
            return Err(e);
        }
        self.claims.lock().push(option.id.clone());
        if let Some(key) = self.unlocks.lock().get(&option.id).cloned() {
            if let Some((_, Ok(keys))) = self.orders.lock().iter_mut().find(|(o, _)| o.id == month.order_id) {
                keys.push(key);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Target platform
// ---------------------------------------------------------------------------

static RSA_KEY: OnceLock<(rsa::RsaPrivateKey, PasswordKey)> = OnceLock::new();

/// A throwaway RSA key pair, generated once per test binary.
pub fn password_key() -> &'static (rsa::RsaPrivateKey, PasswordKey) {
    RSA_KEY.get_or_init(|| {
        use rsa::traits::PublicKeyParts;
        let mut rng = rsa::rand_core::OsRng;
        let private = rsa::RsaPrivateKey::new(&mut rng, 1024).expect("rsa keygen");
        let public = private.to_public_key();
        let key = PasswordKey {
            modulus_hex: hex::encode(public.n().to_bytes_be()),
            exponent_hex: hex::encode(public.e().to_bytes_be()),
            timestamp: "1700000000".to_string(),
        };
        (private, key)
    })
}

pub fn credential_login(confirmations: Vec<GuardKind>) -> CredentialLogin {
    CredentialLogin {
        handle: PollHandle {
            client_id: CREDENTIAL_CLIENT.to_string(),
            request_id: "cred-request".to_string(),
        },
        account_id: "76561198000000000".to_string(),
        confirmations,
    }
}

pub fn granted(account: &str) -> PollStatus {
    PollStatus::Granted(LoginGrant {
        refresh_token: format!("refresh-{}", account),
        account_name: Some(account.to_string()),
    })
}

#[derive(Default)]
pub struct FakeTarget {
    pub probe_result: Mutex<Option<Result<bool, RemoteError>>>,
    pub polls: Mutex<HashMap<String, VecDeque<PollStatus>>>,
    pub credential_results: Mutex<VecDeque<Option<CredentialLogin>>>,
    pub guard_replies: Mutex<VecDeque<GuardCodeStatus>>,
    pub owned: Mutex<Option<Result<OwnedIds, RemoteError>>>,
    pub pages: Mutex<HashMap<Option<u64>, Result<CatalogPage, RemoteError>>>,
    pub activations: Mutex<HashMap<String, VecDeque<Result<ActivationResponse, RemoteError>>>>,

    pub calls: AtomicUsize,
    pub password_key_fetches: AtomicUsize,
    pub decrypted_secrets: Mutex<Vec<String>>,
    pub guard_codes: Mutex<Vec<(String, GuardKind)>>,
    pub activated: Mutex<Vec<String>>,
    pub page_requests: Mutex<Vec<Option<u64>>>,
}

impl FakeTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_probe(&self, result: Result<bool, RemoteError>) {
        *self.probe_result.lock() = Some(result);
    }

    pub fn script_polls(&self, client_id: &str, statuses: Vec<PollStatus>) {
        self.polls
            .lock()
            .insert(client_id.to_string(), statuses.into_iter().collect());
    }

    /// Own `apps`, each named by the single catalog page.
    pub fn own(&self, apps: &[(u64, &str)]) {
        *self.owned.lock() = Some(Ok(OwnedIds {
            apps: apps.iter().map(|(id, _)| *id).collect(),
            packages: Default::default(),
        }));
        self.pages.lock().insert(
            None,
            Ok(CatalogPage {
                apps: apps
                    .iter()
                    .map(|(id, title)| CatalogApp {
                        id: *id,
                        title: title.to_string(),
                    })
                    .collect(),
                next: None,
            }),
        );
    }

    pub fn script_activation(&self, code: &str, replies: Vec<Result<ActivationResponse, RemoteError>>) {
        self.activations
            .lock()
            .insert(code.to_string(), replies.into_iter().collect());
    }

    pub fn activation_count(&self) -> usize {
        self.activated.lock().len()
    }

    fn touch(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SessionProbe for FakeTarget {
    async fn probe(&self, _session: &Session) -> Result<bool, RemoteError> {
        self.touch();
        self.probe_result.lock().clone().unwrap_or(Ok(true))
    }
}

#[async_trait]
impl TargetPlatformClient for FakeTarget {
    async fn begin_qr_login(&self) -> Result<QrChallenge, RemoteError> {
        self.touch();
        Ok(QrChallenge {
            challenge_url: QR_URL.to_string(),
            handle: PollHandle {
                client_id: QR_CLIENT.to_string(),
                request_id: "qr-request".to_string(),
            },
        })
    }

    async fn fetch_password_key(&self, _account: &str) -> Result<PasswordKey, RemoteError> {
        self.touch();
        self.password_key_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(password_key().1.clone())
    }

    async fn begin_credential_login(
        &self,
        _account: &str,
        secret: &EncryptedSecret,
    ) -> Result<Option<CredentialLogin>, RemoteError> {
        use base64::Engine;
        self.touch();
        let ciphertext = base64::engine::general_purpose::STANDARD
            .decode(&secret.ciphertext_b64)
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        let plain = password_key()
            .0
            .decrypt(rsa::Pkcs1v15Encrypt, &ciphertext)
            .map_err(|e| RemoteError::Protocol(e.to_string()))?;
        self.decrypted_secrets
            .lock()
            .push(String::from_utf8_lossy(&plain).into_owned());

        Ok(self.credential_results.lock().pop_front().flatten())
    }

    async fn submit_guard_code(
        &self,
        _login: &CredentialLogin,
        code: &str,
        kind: GuardKind,
    ) -> Result<GuardCodeStatus, RemoteError> {
        self.touch();
        self.guard_codes.lock().push((code.to_string(), kind));
        Ok(self
            .guard_replies
            .lock()
            .pop_front()
            .unwrap_or(GuardCodeStatus::Accepted))
    }

    async fn poll_login(&self, handle: &PollHandle) -> Result<PollStatus, RemoteError> {
        self.touch();
        Ok(self
            .polls
            .lock()
            .get_mut(&handle.client_id)
            .and_then(|q| q.pop_front())
            .unwrap_or(PollStatus::Pending { rotated: None }))
    }

    async fn finalize(&self, grant: &LoginGrant) -> Result<Session, RemoteError> {
        self.touch();
        Ok(Session::new(
            Provider::TargetPlatform,
            format!("steamLoginSecure={}", grant.refresh_token),
        ))
    }

    async fn owned_ids(&self, _session: &Session) -> Result<OwnedIds, RemoteError> {
        self.touch();
        self.owned
            .lock()
            .clone()
            .unwrap_or_else(|| Ok(OwnedIds::default()))
    }

    async fn catalog_page(&self, _api_key: &str, after: Option<u64>) -> Result<CatalogPage, RemoteError> {
        self.touch();
        self.page_requests.lock().push(after);
        self.pages
            .lock()
            .get(&after)
            .cloned()
            .unwrap_or_else(|| Ok(CatalogPage::default()))
    }

    async fn activate(&self, _session: &Session, code: &str) -> Result<ActivationResponse, RemoteError> {
        self.touch();
        self.activated.lock().push(code.to_string());
        self.activations
            .lock()
            .get_mut(code)
            .and_then(|q| q.pop_front())
            .unwrap_or_else(|| {
                Ok(ActivationResponse::Activated {
                    items: vec![code.to_string()],
                })
            })
    }
}

// ---------------------------------------------------------------------------
// Operator
// ---------------------------------------------------------------------------

/// Answers prompts from queues. An empty queue behaves like a human who
/// never types anything: the prompt waits until cancelled.
#[derive(Default)]
pub struct ScriptedOperator {
    pub credentials: Mutex<VecDeque<Option<Credentials>>>,
    pub codes: Mutex<VecDeque<Option<String>>>,
    pub api_key: Mutex<Option<String>>,

    pub credential_prompts: AtomicUsize,
    pub code_prompts: Mutex<Vec<SecondFactorKind>>,
    pub challenges: Mutex<Vec<String>>,
    pub notices: Mutex<Vec<Notice>>,
}

impl ScriptedOperator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_credentials(&self, account: &str, secret: &str) {
        self.credentials
            .lock()
            .push_back(Some(Credentials::new(account, secret)));
    }

    pub fn decline_credentials(&self) {
        self.credentials.lock().push_back(None);
    }

    pub fn push_code(&self, code: &str) {
        self.codes.lock().push_back(Some(code.to_string()));
    }

    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }
}

#[async_trait]
impl Operator for ScriptedOperator {
    async fn credentials(
        &self,
        _provider: Provider,
        _account_hint: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Option<Credentials>, OperatorError> {
        self.credential_prompts.fetch_add(1, Ordering::SeqCst);
        let next = self.credentials.lock().pop_front();
        match next {
            Some(answer) => Ok(answer),
            None => {
                cancel.cancelled().await;
                Ok(None)
            }
        }
    }

    async fn second_factor(
        &self,
        _provider: Provider,
        kind: SecondFactorKind,
        cancel: CancellationToken,
    ) -> Result<Option<String>, OperatorError> {
        self.code_prompts.lock().push(kind);
        let next = self.codes.lock().pop_front();
        match next {
            Some(answer) => Ok(answer),
            None => {
                cancel.cancelled().await;
                Ok(None)
            }
        }
    }

    async fn present_challenge(&self, _provider: Provider, challenge_url: &str) {
        self.challenges.lock().push(challenge_url.to_string());
    }

    async fn notify(&self, _provider: Provider, notice: Notice) {
        self.notices.lock().push(notice);
    }

    async fn api_key(&self) -> Result<Option<String>, OperatorError> {
        Ok(self.api_key.lock().clone())
    }
}

pub fn arc<T>(value: T) -> Arc<T> {
    Arc::new(value)
}

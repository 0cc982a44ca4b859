//! The seam between the engine and the two web services.
//!
//! Adapters over the real HTTP bindings live in [`crate::adapters`]; tests
//! substitute in-memory fakes.

use std::collections::HashSet;
use std::fmt;

use async_trait::async_trait;
use thiserror::Error;

use crate::keys::{GiftToken, KeyRecord, OrderRef};
use crate::session::Session;

/// Failure of a single remote call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The provider rejected the session.
    #[error("session rejected by provider")]
    Unauthorized,

    #[error("transport error: {0}")]
    Transport(String),

    /// The provider answered with something we could not interpret.
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl RemoteError {
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, RemoteError::Unauthorized)
    }
}

/// Username and password, as typed by the operator.
#[derive(Clone)]
pub struct Credentials {
    pub account: String,
    secret: String,
}

impl Credentials {
    pub fn new(account: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("account", &self.account)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// The kind of one-time code the operator is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactorKind {
    /// A code delivered by email.
    EmailCode,
    /// A code from an authenticator app or mobile device.
    AuthenticatorCode,
}

/// Cheap liveness check shared by both clients.
#[async_trait]
pub trait SessionProbe: Send + Sync {
    /// `Ok(false)` means the provider no longer accepts the session.
    async fn probe(&self, session: &Session) -> Result<bool, RemoteError>;
}

// ---------------------------------------------------------------------------
// Key source
// ---------------------------------------------------------------------------

/// A login waiting for its second factor.
#[derive(Debug, Clone)]
pub struct PendingLogin {
    pub kind: SecondFactorKind,
    /// Opaque provider state carried to the next submission.
    pub state: String,
}

#[derive(Debug, Clone)]
pub enum LoginRejection {
    BadCredentials(String),
    /// The code was wrong; the login may continue with another code.
    InvalidCode(PendingLogin),
    TermsNotAccepted,
    Other(String),
}

#[derive(Debug)]
pub enum LoginStep {
    Authenticated(Session),
    SecondFactorRequired(PendingLogin),
    Rejected(LoginRejection),
}

/// A Humble Choice month with games still to pick.
#[derive(Debug, Clone)]
pub struct ChoiceMonth {
    /// The month's order; claimed games add their keys to it.
    pub order_id: String,
    pub title: String,
    pub remaining: u32,
    /// Provider id of the offer the options belong to.
    pub offer_id: String,
    pub page_url: String,
    /// Games not taken yet.
    pub options: Vec<ChoiceOption>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChoiceOption {
    pub id: String,
    pub title: String,
    /// Review summary such as "Very Positive (93%)".
    pub rating: Option<String>,
    /// Gamekey to claim under. Without one the game is claimed on the website.
    pub claim_key: Option<String>,
    pub page_url: String,
}

impl ChoiceOption {
    pub fn website_only(&self) -> bool {
        self.claim_key.is_none()
    }
}

#[async_trait]
pub trait KeySourceClient: SessionProbe {
    async fn submit_credentials(&self, credentials: &Credentials) -> Result<LoginStep, RemoteError>;

    async fn submit_second_factor(
        &self,
        pending: &PendingLogin,
        credentials: &Credentials,
        code: &str,
    ) -> Result<LoginStep, RemoteError>;

    async fn list_orders(&self, session: &Session) -> Result<Vec<OrderRef>, RemoteError>;

    /// Keys of one order that target the target platform, in order.
    async fn fetch_order(&self, session: &Session, order: &OrderRef) -> Result<Vec<KeyRecord>, RemoteError>;

    /// Reveal a gifted key. Irreversible on the provider side.
    async fn reveal_key(&self, session: &Session, order_id: &str, gift: &GiftToken) -> Result<String, RemoteError>;

    /// Choice months with picks left, oldest first.
    async fn choice_months(&self, session: &Session) -> Result<Vec<ChoiceMonth>, RemoteError>;

    /// Claim one game of a month.
    async fn choose_content(
        &self,
        session: &Session,
        month: &ChoiceMonth,
        option: &ChoiceOption,
    ) -> Result<(), RemoteError>;
}

// ---------------------------------------------------------------------------
// Target platform
// ---------------------------------------------------------------------------

/// Identifies an in-flight login on the target platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollHandle {
    pub client_id: String,
    pub request_id: String,
}

#[derive(Debug, Clone)]
pub struct QrChallenge {
    pub challenge_url: String,
    pub handle: PollHandle,
}

/// Public key used to encrypt the password. Fetched per attempt.
#[derive(Debug, Clone)]
pub struct PasswordKey {
    pub modulus_hex: String,
    pub exponent_hex: String,
    pub timestamp: String,
}

#[derive(Clone)]
pub struct EncryptedSecret {
    pub ciphertext_b64: String,
    pub timestamp: String,
}

impl fmt::Debug for EncryptedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptedSecret")
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

/// Guard confirmations offered for a credential login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardKind {
    None,
    EmailCode,
    DeviceCode,
    DeviceConfirmation,
    EmailConfirmation,
}

#[derive(Debug, Clone)]
pub struct CredentialLogin {
    pub handle: PollHandle,
    pub account_id: String,
    pub confirmations: Vec<GuardKind>,
}

impl CredentialLogin {
    pub fn offers(&self, kind: GuardKind) -> bool {
        self.confirmations.contains(&kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardCodeStatus {
    Accepted,
    Rejected,
}

/// Proof of a completed login, exchanged for a [`Session`].
#[derive(Clone)]
pub struct LoginGrant {
    pub refresh_token: String,
    pub account_name: Option<String>,
}

impl fmt::Debug for LoginGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginGrant")
            .field("account_name", &self.account_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub enum PollStatus {
    /// Not approved yet. The provider may rotate the challenge.
    Pending { rotated: Option<QrChallenge> },
    Granted(LoginGrant),
    /// The login request is gone (expired or denied).
    Expired,
}

/// Ids of everything the account owns.
#[derive(Debug, Clone, Default)]
pub struct OwnedIds {
    pub apps: HashSet<u64>,
    pub packages: HashSet<u64>,
}

impl OwnedIds {
    /// App ownership only; package ids are a separate id space.
    pub fn owns_app(&self, app_id: u64) -> bool {
        self.apps.contains(&app_id)
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty() && self.packages.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogApp {
    pub id: u64,
    pub title: String,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogPage {
    pub apps: Vec<CatalogApp>,
    /// Cursor for the next page, if there is one.
    pub next: Option<u64>,
}

/// Raw answer to an activation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationResponse {
    Activated { items: Vec<String> },
    Failed { code: i64 },
    /// The provider answered without a usable result code.
    Unrecognized(String),
}

#[async_trait]
pub trait TargetPlatformClient: SessionProbe {
    async fn begin_qr_login(&self) -> Result<QrChallenge, RemoteError>;

    async fn fetch_password_key(&self, account: &str) -> Result<PasswordKey, RemoteError>;

    /// `Ok(None)` means the credentials were rejected.
    async fn begin_credential_login(
        &self,
        account: &str,
        secret: &EncryptedSecret,
    ) -> Result<Option<CredentialLogin>, RemoteError>;

    async fn submit_guard_code(
        &self,
        login: &CredentialLogin,
        code: &str,
        kind: GuardKind,
    ) -> Result<GuardCodeStatus, RemoteError>;

    async fn poll_login(&self, handle: &PollHandle) -> Result<PollStatus, RemoteError>;

    async fn finalize(&self, grant: &LoginGrant) -> Result<Session, RemoteError>;

    async fn owned_ids(&self, session: &Session) -> Result<OwnedIds, RemoteError>;

    async fn catalog_page(&self, api_key: &str, after: Option<u64>) -> Result<CatalogPage, RemoteError>;

    async fn activate(&self, session: &Session, code: &str) -> Result<ActivationResponse, RemoteError>;
}

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::crypto::encrypt_secret;
use super::operator::{Notice, Operator};
use super::poll::poll_until_granted;
use super::race::{Winner, race};
use super::{AuthFailure, RunMode, persist, resume_saved};
use crate::config::AuthConfig;
use crate::remote::{
    CredentialLogin, GuardCodeStatus, GuardKind, LoginGrant, SecondFactorKind, TargetPlatformClient,
};
use crate::session::{Provider, Session, SessionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAuthState {
    Init,
    QrPending,
    CredentialPending,
    SecondFactorRace,
    Authenticated,
    Failed(AuthFailure),
}

/// Everything a login branch needs, cheap to clone into a task.
#[derive(Clone)]
struct LoginContext {
    client: Arc<dyn TargetPlatformClient>,
    operator: Arc<dyn Operator>,
    config: AuthConfig,
    state: Arc<Mutex<TargetAuthState>>,
}

impl LoginContext {
    fn set_state(&self, next: TargetAuthState) {
        let mut state = self.state.lock();
        if *state != next {
            debug!(from = ?*state, to = ?next, "Target auth state");
            *state = next;
        }
    }

    /// QR branch: show the challenge, poll until someone approves it.
    async fn qr_login(self, cancel: CancellationToken) -> Result<LoginGrant, AuthFailure> {
        let challenge = self.client.begin_qr_login().await?;
        self.set_state(TargetAuthState::QrPending);
        self.operator
            .present_challenge(Provider::TargetPlatform, &challenge.challenge_url)
            .await;

        let mut handle = challenge.handle;
        poll_until_granted(
            self.client.as_ref(),
            &mut handle,
            self.config.poll_interval(),
            self.config.qr_max_wait(),
            &cancel,
            Some(self.operator.as_ref()),
        )
        .await
    }

    /// Credential branch: password, then whatever guard the account uses.
    async fn credential_login(self, cancel: CancellationToken) -> Result<LoginGrant, AuthFailure> {
        let mut account_hint: Option<String> = None;
        let mut attempts = 0;

        loop {
            let credentials = self
                .operator
                .credentials(Provider::TargetPlatform, account_hint.as_deref(), cancel.clone())
                .await?
                .ok_or(AuthFailure::Cancelled)?;
            if cancel.is_cancelled() {
                return Err(AuthFailure::Cancelled);
            }
            self.set_state(TargetAuthState::CredentialPending);
            attempts += 1;

            // A fresh key for every submission.
            let key = self.client.fetch_password_key(&credentials.account).await?;
            let secret = encrypt_secret(&key, credentials.secret())?;

            match self
                .client
                .begin_credential_login(&credentials.account, &secret)
                .await?
            {
                Some(login) => return self.confirm(login, cancel).await,
                None if attempts < self.config.max_login_attempts => {
                    self.operator
                        .notify(Provider::TargetPlatform, Notice::CredentialsRejected)
                        .await;
                    account_hint = Some(credentials.account.clone());
                }
                None => return Err(AuthFailure::BadCredentials),
            }
        }
    }

    async fn confirm(self, login: CredentialLogin, cancel: CancellationToken) -> Result<LoginGrant, AuthFailure> {
        if login.offers(GuardKind::DeviceCode) && login.offers(GuardKind::DeviceConfirmation) {
            self.set_state(TargetAuthState::SecondFactorRace);
            self.operator
                .notify(Provider::TargetPlatform, Notice::ApproveOrEnterCode)
                .await;

            // One approval poll spans every typed-code attempt; it stops only
            // when a code is accepted or the approval itself arrives.
            let inner = cancel.child_token();
            let codes = {
                let ctx = self.clone();
                let login = login.clone();
                let token = inner.clone();
                async move {
                    ctx.submit_codes(&login, GuardKind::DeviceCode, &token)
                        .await
                }
            };
            let approval = {
                let ctx = self.clone();
                let token = inner.clone();
                let mut handle = login.handle.clone();
                async move {
                    poll_until_granted(
                        ctx.client.as_ref(),
                        &mut handle,
                        ctx.config.poll_interval(),
                        ctx.config.login_max_wait(),
                        &token,
                        None,
                    )
                    .await
                }
            };

            match race(inner, codes, approval).await {
                Ok(Winner::Second(grant)) => return Ok(grant),
                Ok(Winner::First(())) => debug!("Typed code accepted"),
                Err(failures) => {
                    if cancel.is_cancelled() {
                        return Err(AuthFailure::Cancelled);
                    }
                    return Err(AuthFailure::most_relevant(failures));
                }
            }
        } else if login.offers(GuardKind::DeviceCode) {
            self.submit_codes(&login, GuardKind::DeviceCode, &cancel).await?;
        } else if login.offers(GuardKind::EmailCode) {
            self.submit_codes(&login, GuardKind::EmailCode, &cancel).await?;
        } else if login.offers(GuardKind::DeviceConfirmation) {
            self.operator
                .notify(Provider::TargetPlatform, Notice::ApproveOnDevice)
                .await;
        } else if login.offers(GuardKind::EmailConfirmation) {
            self.operator
                .notify(Provider::TargetPlatform, Notice::ConfirmByEmail)
                .await;
        }

        let mut handle = login.handle.clone();
        poll_until_granted(
            self.client.as_ref(),
            &mut handle,
            self.config.poll_interval(),
            self.config.login_max_wait(),
            &cancel,
            None,
        )
        .await
    }

    async fn prompt_code(&self, kind: SecondFactorKind, cancel: CancellationToken) -> Result<String, AuthFailure> {
        let code = self
            .operator
            .second_factor(Provider::TargetPlatform, kind, cancel.clone())
            .await?
            .ok_or(AuthFailure::Cancelled)?;
        if cancel.is_cancelled() {
            return Err(AuthFailure::Cancelled);
        }
        Ok(code.trim().to_uppercase())
    }

    /// Submit guard codes until one is accepted or attempts run out.
    async fn submit_codes(
        &self,
        login: &CredentialLogin,
        kind: GuardKind,
        cancel: &CancellationToken,
    ) -> Result<(), AuthFailure> {
        let prompt_kind = match kind {
            GuardKind::EmailCode => SecondFactorKind::EmailCode,
            _ => SecondFactorKind::AuthenticatorCode,
        };

        for attempt in 1..=self.config.max_login_attempts {
            let code = self.prompt_code(prompt_kind, cancel.clone()).await?;
            match self.client.submit_guard_code(login, &code, kind).await? {
                GuardCodeStatus::Accepted => return Ok(()),
                GuardCodeStatus::Rejected => {
                    debug!(attempt, "Guard code rejected");
                    self.operator
                        .notify(Provider::TargetPlatform, Notice::CodeRejected)
                        .await;
                }
            }
        }
        Err(AuthFailure::InvalidCode)
    }
}

/// Signs in to the target platform.
///
/// Without a usable saved session, the QR login and the credential login
/// run concurrently; the first to succeed wins and the other is cancelled.
pub struct TargetAuthenticator {
    ctx: LoginContext,
    store: Arc<dyn SessionStore>,
    mode: RunMode,
}

impl TargetAuthenticator {
    pub fn new(
        client: Arc<dyn TargetPlatformClient>,
        store: Arc<dyn SessionStore>,
        operator: Arc<dyn Operator>,
        config: AuthConfig,
        mode: RunMode,
    ) -> Self {
        Self {
            ctx: LoginContext {
                client,
                operator,
                config,
                state: Arc::new(Mutex::new(TargetAuthState::Init)),
            },
            store,
            mode,
        }
    }

    pub fn state(&self) -> TargetAuthState {
        self.ctx.state.lock().clone()
    }

    #[instrument(skip_all, fields(provider = "target_platform"))]
    pub async fn authenticate(&self, cancel: &CancellationToken) -> Result<Arc<Session>, AuthFailure> {
        let result = self.run(cancel).await;
        self.ctx.set_state(match &result {
            Ok(_) => TargetAuthState::Authenticated,
            Err(failure) => TargetAuthState::Failed(failure.clone()),
        });
        result
    }

    async fn run(&self, cancel: &CancellationToken) -> Result<Arc<Session>, AuthFailure> {
        if let Some(session) = resume_saved(
            self.store.as_ref(),
            self.ctx.client.as_ref(),
            Provider::TargetPlatform,
        )
        .await?
        {
            return Ok(session);
        }

        if self.mode == RunMode::Unattended {
            return Err(AuthFailure::SessionRequired(Provider::TargetPlatform));
        }

        self.ctx.set_state(TargetAuthState::Init);
        let token = cancel.child_token();
        let qr = self.ctx.clone().qr_login(token.clone());
        let credentials = self.ctx.clone().credential_login(token.clone());

        let grant = match race(token, qr, credentials).await {
            Ok(Winner::First(grant)) => {
                debug!("QR login won");
                grant
            }
            Ok(Winner::Second(grant)) => {
                debug!("Credential login won");
                grant
            }
            Err(failures) => {
                if cancel.is_cancelled() {
                    return Err(AuthFailure::Cancelled);
                }
                return Err(AuthFailure::most_relevant(failures));
            }
        };

        let session = self.ctx.client.finalize(&grant).await?;
        session.mark_in_use();
        persist(self.store.as_ref(), &session).await;
        info!(
            account = grant.account_name.as_deref().unwrap_or("unknown"),
            "Signed in to {}",
            Provider::TargetPlatform
        );
        Ok(Arc::new(session))
    }
}

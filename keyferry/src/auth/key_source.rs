use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::operator::{Notice, Operator};
use super::{AuthFailure, RunMode, persist, resume_saved};
use crate::config::AuthConfig;
use crate::remote::{Credentials, KeySourceClient, LoginRejection, LoginStep};
use crate::session::{Provider, Session, SessionStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySourceAuthState {
    NeedCredentials,
    AwaitingSecondFactor,
    Authenticated,
    Failed(AuthFailure),
}

/// Signs in to the key source: saved session, then credentials plus an
/// optional second factor.
pub struct KeySourceAuthenticator {
    client: Arc<dyn KeySourceClient>,
    store: Arc<dyn SessionStore>,
    operator: Arc<dyn Operator>,
    config: AuthConfig,
    mode: RunMode,
    state: KeySourceAuthState,
}

impl KeySourceAuthenticator {
    pub fn new(
        client: Arc<dyn KeySourceClient>,
        store: Arc<dyn SessionStore>,
        operator: Arc<dyn Operator>,
        config: AuthConfig,
        mode: RunMode,
    ) -> Self {
        Self {
            client,
            store,
            operator,
            config,
            mode,
            state: KeySourceAuthState::NeedCredentials,
        }
    }

    pub fn state(&self) -> &KeySourceAuthState {
        &self.state
    }

    #[instrument(skip_all, fields(provider = "key_source"))]
    pub async fn authenticate(&mut self, cancel: &CancellationToken) -> Result<Arc<Session>, AuthFailure> {
        let result = self.run(cancel).await;
        self.state = match &result {
            Ok(_) => KeySourceAuthState::Authenticated,
            Err(failure) => KeySourceAuthState::Failed(failure.clone()),
        };
        result
    }

    async fn run(&mut self, cancel: &CancellationToken) -> Result<Arc<Session>, AuthFailure> {
        if let Some(session) =
            resume_saved(self.store.as_ref(), self.client.as_ref(), Provider::KeySource).await?
        {
            return Ok(session);
        }

        if self.mode == RunMode::Unattended {
            return Err(AuthFailure::SessionRequired(Provider::KeySource));
        }

        let session = self.login(cancel).await?;
        session.mark_in_use();
        persist(self.store.as_ref(), &session).await;
        info!("Signed in to {}", Provider::KeySource);
        Ok(Arc::new(session))
    }

    async fn login(&mut self, cancel: &CancellationToken) -> Result<Session, AuthFailure> {
        let mut account_hint: Option<String> = None;
        let mut attempts = 0;

        loop {
            self.state = KeySourceAuthState::NeedCredentials;
            let credentials = self
                .operator
                .credentials(Provider::KeySource, account_hint.as_deref(), cancel.clone())
                .await?
                .ok_or(AuthFailure::Cancelled)?;
            if cancel.is_cancelled() {
                return Err(AuthFailure::Cancelled);
            }
            attempts += 1;

            let step = self.client.submit_credentials(&credentials).await?;
            match self.complete(step, &credentials, cancel).await {
                Err(AuthFailure::BadCredentials) if attempts < self.config.max_login_attempts => {
                    self.operator
                        .notify(Provider::KeySource, Notice::CredentialsRejected)
                        .await;
                    account_hint = Some(credentials.account.clone());
                }
                other => return other,
            }
        }
    }

    /// Drive a login step through any number of second-factor prompts.
    async fn complete(
        &mut self,
        mut step: LoginStep,
        credentials: &Credentials,
        cancel: &CancellationToken,
    ) -> Result<Session, AuthFailure> {
        let mut code_attempts = 0;

        loop {
            let pending = match step {
                LoginStep::Authenticated(session) => return Ok(session),
                LoginStep::SecondFactorRequired(pending) => pending,
                LoginStep::Rejected(LoginRejection::InvalidCode(pending)) => {
                    if code_attempts >= self.config.max_login_attempts {
                        return Err(AuthFailure::InvalidCode);
                    }
                    self.operator
                        .notify(Provider::KeySource, Notice::CodeRejected)
                        .await;
                    pending
                }
                LoginStep::Rejected(LoginRejection::BadCredentials(message)) => {
                    debug!(%message, "Credentials rejected");
                    return Err(AuthFailure::BadCredentials);
                }
                LoginStep::Rejected(LoginRejection::TermsNotAccepted) => {
                    return Err(AuthFailure::ProviderUnavailable(
                        "updated terms of service must be accepted in a browser first".to_string(),
                    ));
                }
                LoginStep::Rejected(LoginRejection::Other(message)) => {
                    return Err(AuthFailure::ProviderUnavailable(message));
                }
            };

            self.state = KeySourceAuthState::AwaitingSecondFactor;
            let code = self
                .operator
                .second_factor(Provider::KeySource, pending.kind, cancel.clone())
                .await?
                .ok_or(AuthFailure::Cancelled)?;
            if cancel.is_cancelled() {
                return Err(AuthFailure::Cancelled);
            }
            code_attempts += 1;

            step = self
                .client
                .submit_second_factor(&pending, credentials, code.trim())
                .await?;
        }
    }
}

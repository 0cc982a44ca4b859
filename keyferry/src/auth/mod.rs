//! Authentication against the key source and the target platform.
//!
//! Both controllers first try the saved session; a fresh login is only
//! attempted in interactive mode.

pub mod crypto;
mod key_source;
mod operator;
mod poll;
mod race;
mod target;

pub use key_source::{KeySourceAuthState, KeySourceAuthenticator};
pub use operator::{Notice, Operator, OperatorError, UnattendedOperator};
pub use target::{TargetAuthState, TargetAuthenticator};

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::remote::{RemoteError, SessionProbe};
use crate::session::{Provider, Session, SessionStore};

/// Whether an operator is available to answer prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunMode {
    #[default]
    Interactive,
    Unattended,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("credentials were rejected")]
    BadCredentials,

    #[error("verification code was rejected")]
    InvalidCode,

    #[error("timed out waiting for login approval")]
    Timeout,

    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("no usable saved {0} session; run interactively to sign in")]
    SessionRequired(Provider),

    #[error("login cancelled")]
    Cancelled,
}

impl AuthFailure {
    /// Preference when two login paths both fail; higher is more useful to
    /// report.
    fn rank(&self) -> u8 {
        match self {
            AuthFailure::Cancelled => 0,
            AuthFailure::Timeout => 1,
            AuthFailure::ProviderUnavailable(_) => 2,
            AuthFailure::InvalidCode => 3,
            AuthFailure::BadCredentials => 4,
            AuthFailure::SessionRequired(_) => 5,
        }
    }

    /// The most informative of several failures.
    pub(crate) fn most_relevant(failures: Vec<AuthFailure>) -> AuthFailure {
        failures
            .into_iter()
            .rev()
            .max_by_key(AuthFailure::rank)
            .unwrap_or(AuthFailure::Cancelled)
    }
}

impl From<RemoteError> for AuthFailure {
    fn from(e: RemoteError) -> Self {
        AuthFailure::ProviderUnavailable(e.to_string())
    }
}

impl From<crypto::CryptoError> for AuthFailure {
    fn from(e: crypto::CryptoError) -> Self {
        AuthFailure::ProviderUnavailable(e.to_string())
    }
}

impl From<OperatorError> for AuthFailure {
    fn from(e: OperatorError) -> Self {
        match e {
            OperatorError::Aborted => AuthFailure::Cancelled,
            OperatorError::Unavailable => AuthFailure::Cancelled,
            OperatorError::Input(msg) => AuthFailure::ProviderUnavailable(msg),
        }
    }
}

/// Load and probe the saved session for `provider`.
///
/// A rejected session is invalidated and `Ok(None)` returned. A probe that
/// cannot reach the provider is a failure, not an expiry.
pub(crate) async fn resume_saved<P>(
    store: &dyn SessionStore,
    probe: &P,
    provider: Provider,
) -> Result<Option<Arc<Session>>, AuthFailure>
where
    P: SessionProbe + ?Sized,
{
    let Some(session) = store.load(provider).await else {
        return Ok(None);
    };

    match probe.probe(&session).await {
        Ok(true) => {
            info!(provider = provider.as_str(), "Resumed saved session");
            session.mark_in_use();
            Ok(Some(Arc::new(session)))
        }
        Ok(false) | Err(RemoteError::Unauthorized) => {
            info!(provider = provider.as_str(), "Saved session has expired");
            session.mark_expired();
            if let Err(e) = store.invalidate(provider).await {
                warn!(provider = provider.as_str(), error = %e, "Failed to discard expired session");
            }
            Ok(None)
        }
        Err(e) => Err(AuthFailure::ProviderUnavailable(e.to_string())),
    }
}

/// Persist a fresh session. Failure to save is logged, not fatal.
pub(crate) async fn persist(store: &dyn SessionStore, session: &Session) {
    if let Err(e) = store.save(session.provider(), session).await {
        warn!(provider = session.provider().as_str(), error = %e, "Failed to save session");
    }
}

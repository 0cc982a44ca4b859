//! The human at the keyboard, as seen by the auth controllers.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::remote::{Credentials, SecondFactorKind};
use crate::session::Provider;

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("operator input is not available in unattended mode")]
    Unavailable,

    #[error("operator aborted")]
    Aborted,

    #[error("input error: {0}")]
    Input(String),
}

/// Something the operator should know about, without needing an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    CredentialsRejected,
    CodeRejected,
    /// Approve the login in the mobile app.
    ApproveOnDevice,
    /// Approve in the mobile app or type the code it shows.
    ApproveOrEnterCode,
    /// Check email and follow the link.
    ConfirmByEmail,
    Info(String),
}

/// Source of credentials and codes.
///
/// Prompts must return promptly once `cancel` fires; a prompt raced against
/// another login path is abandoned that way.
#[async_trait]
pub trait Operator: Send + Sync {
    /// `Ok(None)` means the operator declined to enter credentials.
    async fn credentials(
        &self,
        provider: Provider,
        account_hint: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Option<Credentials>, OperatorError>;

    async fn second_factor(
        &self,
        provider: Provider,
        kind: SecondFactorKind,
        cancel: CancellationToken,
    ) -> Result<Option<String>, OperatorError>;

    /// Show a challenge (a QR login URL) to be approved on another device.
    async fn present_challenge(&self, provider: Provider, challenge_url: &str);

    async fn notify(&self, provider: Provider, notice: Notice);

    /// Ask for the target platform web API key. `None` skips the ownership
    /// check.
    async fn api_key(&self) -> Result<Option<String>, OperatorError>;
}

/// Operator for unattended runs: every prompt is refused.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnattendedOperator;

#[async_trait]
impl Operator for UnattendedOperator {
    async fn credentials(
        &self,
        _provider: Provider,
        _account_hint: Option<&str>,
        _cancel: CancellationToken,
    ) -> Result<Option<Credentials>, OperatorError> {
        Err(OperatorError::Unavailable)
    }

    async fn second_factor(
        &self,
        _provider: Provider,
        _kind: SecondFactorKind,
        _cancel: CancellationToken,
    ) -> Result<Option<String>, OperatorError> {
        Err(OperatorError::Unavailable)
    }

    async fn present_challenge(&self, _provider: Provider, _challenge_url: &str) {}

    async fn notify(&self, _provider: Provider, _notice: Notice) {}

    async fn api_key(&self) -> Result<Option<String>, OperatorError> {
        Ok(None)
    }
}

//! Terminal operator: inquire prompts and QR rendering.

use async_trait::async_trait;
use inquire::list_option::ListOption;
use inquire::validator::Validation;
use inquire::{Confirm, CustomUserError, InquireError, MultiSelect, Password, PasswordDisplayMode, Text};
use keyferry::auth::{Notice, Operator, OperatorError};
use keyferry::remote::{ChoiceMonth, ChoiceOption, Credentials, SecondFactorKind};
use keyferry::session::Provider;
use qrcode::QrCode;
use qrcode::render::unicode;
use tokio::sync::{Mutex, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::choose::GamePicker;
use crate::output::Tone;

/// Prompts on the controlling terminal.
///
/// inquire blocks its thread, so each prompt runs on the blocking pool. A
/// prompt abandoned by cancellation keeps the terminal until the operator
/// presses Enter; the next prompt waits for it first.
#[derive(Default)]
pub struct TerminalOperator {
    abandoned: Mutex<Option<JoinHandle<()>>>,
    entered_api_key: Mutex<Option<String>>,
}

impl TerminalOperator {
    pub fn new() -> Self {
        Self::default()
    }

    /// API key typed at the prompt during this run, to be saved.
    pub async fn entered_api_key(&self) -> Option<String> {
        self.entered_api_key.lock().await.clone()
    }

    async fn ask<T, F>(&self, cancel: Option<CancellationToken>, prompt: F) -> Result<Option<T>, OperatorError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, InquireError> + Send + 'static,
    {
        let mut abandoned = self.abandoned.lock().await;
        if let Some(previous) = abandoned.take() {
            let _ = previous.await;
        }

        let (tx, rx) = oneshot::channel();
        let handle = tokio::task::spawn_blocking(move || {
            let _ = tx.send(prompt());
        });

        let answer = match cancel {
            Some(cancel) => {
                tokio::select! {
                    answer = rx => answer,
                    _ = cancel.cancelled() => {
                        eprintln!("{}", Tone::Muted.paint("(no longer needed, press Enter to dismiss)"));
                        *abandoned = Some(handle);
                        return Ok(None);
                    }
                }
            }
            None => rx.await,
        };

        match answer {
            Ok(Ok(value)) => Ok(Some(value)),
            Ok(Err(InquireError::OperationCanceled)) => Ok(None),
            Ok(Err(InquireError::OperationInterrupted)) => Err(OperatorError::Aborted),
            Ok(Err(InquireError::NotTTY)) => Err(OperatorError::Unavailable),
            Ok(Err(e)) => Err(OperatorError::Input(e.to_string())),
            Err(_) => Err(OperatorError::Input("prompt task ended without an answer".to_string())),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

#[async_trait]
impl Operator for TerminalOperator {
    async fn credentials(
        &self,
        provider: Provider,
        account_hint: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<Option<Credentials>, OperatorError> {
        let hint = account_hint.map(str::to_string);
        let account = self
            .ask(Some(cancel.clone()), move || {
                let message = format!("{} username or email:", provider);
                let mut prompt = Text::new(&message);
                if let Some(hint) = hint.as_deref() {
                    prompt = prompt.with_default(hint);
                }
                prompt.prompt()
            })
            .await?;
        let Some(account) = non_empty(account) else {
            return Ok(None);
        };

        let secret = self
            .ask(Some(cancel), move || {
                let message = format!("{} password:", provider);
                Password::new(&message)
                    .without_confirmation()
                    .with_display_mode(PasswordDisplayMode::Masked)
                    .prompt()
            })
            .await?;

        Ok(secret
            .filter(|s| !s.is_empty())
            .map(|secret| Credentials::new(account, secret)))
    }

    async fn second_factor(
        &self,
        provider: Provider,
        kind: SecondFactorKind,
        cancel: CancellationToken,
    ) -> Result<Option<String>, OperatorError> {
        let message = match kind {
            SecondFactorKind::EmailCode => format!("{} code sent to your email:", provider),
            SecondFactorKind::AuthenticatorCode => format!("{} authenticator code:", provider),
        };
        let code = self.ask(Some(cancel), move || Text::new(&message).prompt()).await?;
        Ok(non_empty(code))
    }

    async fn present_challenge(&self, provider: Provider, challenge_url: &str) {
        eprintln!();
        eprintln!(
            "{}",
            Tone::Heading.paint(&format!("Scan with the {} mobile app to sign in:", provider))
        );
        match render_qr(challenge_url) {
            Ok(art) => eprintln!("{}", art),
            Err(e) => warn!(error = %e, "Could not render the QR code"),
        }
        eprintln!("{}", Tone::Muted.paint(challenge_url));
        eprintln!();
    }

    async fn notify(&self, provider: Provider, notice: Notice) {
        let line = match notice {
            Notice::CredentialsRejected => Tone::Error.paint(&format!("{} rejected those credentials.", provider)),
            Notice::CodeRejected => Tone::Error.paint(&format!("{} rejected that code.", provider)),
            Notice::ApproveOnDevice => {
                Tone::Heading.paint(&format!("Approve the sign-in in the {} mobile app.", provider))
            }
            Notice::ApproveOrEnterCode => Tone::Heading.paint(&format!(
                "Approve the sign-in in the {} mobile app, or enter the code it shows.",
                provider
            )),
            Notice::ConfirmByEmail => {
                Tone::Heading.paint(&format!("Follow the link {} sent to your email.", provider))
            }
            Notice::Info(message) => message,
        };
        eprintln!("{}", line);
    }

    async fn api_key(&self) -> Result<Option<String>, OperatorError> {
        let key = self
            .ask(None, || {
                Text::new("Steam web API key (Esc to skip the ownership check):")
                    .with_help_message("https://steamcommunity.com/dev/apikey")
                    .prompt()
            })
            .await?;
        let key = non_empty(key);
        if let Some(key) = &key {
            *self.entered_api_key.lock().await = Some(key.clone());
        }
        Ok(key)
    }
}

fn option_label(option: &ChoiceOption) -> String {
    let mut label = option.title.clone();
    if let Some(rating) = &option.rating {
        label.push_str(&format!(" [{}]", rating));
    }
    if option.website_only() {
        label.push_str(" (website only)");
    }
    label
}

#[async_trait]
impl GamePicker for TerminalOperator {
    async fn pick(&self, month: &ChoiceMonth) -> Result<Option<Vec<usize>>, OperatorError> {
        let labels: Vec<String> = month.options.iter().map(option_label).collect();
        let remaining = month.remaining as usize;
        let message = format!("Games to claim from {} (Esc skips the month):", month.title);

        let within_limit = move |selected: &[ListOption<&String>]| -> Result<Validation, CustomUserError> {
            if selected.len() > remaining {
                Ok(Validation::Invalid(format!("Only {} choices left", remaining).into()))
            } else {
                Ok(Validation::Valid)
            }
        };

        let picked = self
            .ask(None, move || {
                MultiSelect::new(&message, labels)
                    .with_validator(within_limit)
                    .raw_prompt()
                    .map(|chosen| chosen.into_iter().map(|o| o.index).collect::<Vec<usize>>())
            })
            .await?;
        let Some(picked) = picked.filter(|p| !p.is_empty()) else {
            return Ok(None);
        };

        let count = picked.len();
        let confirmed = self
            .ask(None, move || {
                let message = format!("Claim {} games?", count);
                Confirm::new(&message).with_default(true).prompt()
            })
            .await?;
        Ok(confirmed.unwrap_or(false).then_some(picked))
    }
}

/// Render `url` as terminal block art, light on dark.
pub fn render_qr(url: &str) -> Result<String, qrcode::types::QrError> {
    let code = QrCode::new(url.as_bytes())?;
    Ok(code
        .render::<unicode::Dense1x2>()
        .dark_color(unicode::Dense1x2::Light)
        .light_color(unicode::Dense1x2::Dark)
        .build())
}

use std::collections::HashSet;

use async_trait::async_trait;
use reqwest::Client;
use storefronts::humble::{
    self, ChooseRequest, ContentChoice, HumbleFactor, LoginForm, LoginReply, Order, RevealRequest, Tpk,
};
use tracing::{debug, warn};

use super::remote_error;
use crate::keys::{GiftToken, KeyRecord, OrderRef};
use crate::remote::{
    ChoiceMonth, ChoiceOption, Credentials, KeySourceClient, LoginRejection, LoginStep, PendingLogin, RemoteError,
    SecondFactorKind, SessionProbe,
};
use crate::session::{Provider, Session};

/// Humble Bundle as the key source. The session token is the cookie string.
#[derive(Clone)]
pub struct HumbleClient {
    client: Client,
}

impl HumbleClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn step(reply: LoginReply, cookies: String) -> LoginStep {
        match reply {
            LoginReply::Success => LoginStep::Authenticated(Session::new(Provider::KeySource, cookies)),
            LoginReply::SecondFactorRequired {
                factor,
                code_rejected,
            } => {
                let pending = PendingLogin {
                    kind: match factor {
                        HumbleFactor::Guard => SecondFactorKind::EmailCode,
                        HumbleFactor::Totp => SecondFactorKind::AuthenticatorCode,
                    },
                    state: cookies,
                };
                if code_rejected {
                    LoginStep::Rejected(LoginRejection::InvalidCode(pending))
                } else {
                    LoginStep::SecondFactorRequired(pending)
                }
            }
            LoginReply::Rejected(message) => LoginStep::Rejected(LoginRejection::BadCredentials(message)),
            LoginReply::TermsOptInRequired => LoginStep::Rejected(LoginRejection::TermsNotAccepted),
            LoginReply::Unexpected(message) => LoginStep::Rejected(LoginRejection::Other(message)),
        }
    }
}

fn key_record(order_id: &str, tpk: Tpk) -> KeyRecord {
    let order_id = tpk.gamekey.as_deref().unwrap_or(order_id);
    let record = match tpk.redeemed_key_val.as_deref().map(str::trim) {
        Some(code) if !code.is_empty() => {
            KeyRecord::revealed(order_id, &tpk.machine_name, tpk.keyindex, tpk.human_name.trim(), code)
        }
        _ => KeyRecord::unrevealed(order_id, &tpk.machine_name, tpk.keyindex, tpk.human_name.trim()),
    };
    record.with_app_id(tpk.steam_app_id)
}

fn choice_option(choice_url: &str, choice: ContentChoice) -> ChoiceOption {
    let rating = match (choice.review_text, choice.steam_percent) {
        (Some(text), Some(share)) => Some(format!("{} ({:.0}%)", text, share * 100.0)),
        _ => None,
    };
    ChoiceOption {
        page_url: humble::choice_page_url(choice_url, &choice.display_name),
        id: choice.display_name,
        title: choice.title,
        rating,
        claim_key: choice.gamekey,
    }
}

#[async_trait]
impl SessionProbe for HumbleClient {
    async fn probe(&self, session: &Session) -> Result<bool, RemoteError> {
        humble::probe_session(&self.client, session.token())
            .await
            .map_err(remote_error)
    }
}

#[async_trait]
impl KeySourceClient for HumbleClient {
    async fn submit_credentials(&self, credentials: &Credentials) -> Result<LoginStep, RemoteError> {
        let cookies = humble::start_login(&self.client).await.map_err(remote_error)?;
        let form = LoginForm {
            username: &credentials.account,
            password: credentials.secret(),
            ..LoginForm::default()
        };
        let response = humble::submit_login(&self.client, &cookies, &form)
            .await
            .map_err(remote_error)?;
        Ok(Self::step(response.reply, response.cookies))
    }

    async fn submit_second_factor(
        &self,
        pending: &PendingLogin,
        credentials: &Credentials,
        code: &str,
    ) -> Result<LoginStep, RemoteError> {
        let mut form = LoginForm {
            username: &credentials.account,
            password: credentials.secret(),
            ..LoginForm::default()
        };
        match pending.kind {
            SecondFactorKind::EmailCode => form.guard = Some(code),
            SecondFactorKind::AuthenticatorCode => form.code = Some(code),
        }
        let response = humble::submit_login(&self.client, &pending.state, &form)
            .await
            .map_err(remote_error)?;
        Ok(Self::step(response.reply, response.cookies))
    }

    async fn list_orders(&self, session: &Session) -> Result<Vec<OrderRef>, RemoteError> {
        let orders = humble::list_orders(&self.client, session.token())
            .await
            .map_err(remote_error)?;
        Ok(orders
            .into_iter()
            .enumerate()
            .map(|(position, order)| OrderRef {
                id: order.gamekey,
                position,
            })
            .collect())
    }

    async fn fetch_order(&self, session: &Session, order: &OrderRef) -> Result<Vec<KeyRecord>, RemoteError> {
        let details = humble::order_details(&self.client, session.token(), &order.id)
            .await
            .map_err(remote_error)?;

        let mut keys = Vec::new();
        for tpk in details.tpks {
            if !tpk.is_steam() {
                continue;
            }
            if tpk.is_expired {
                debug!(order = %order.id, key = %tpk.machine_name, "Skipping expired key");
                continue;
            }
            keys.push(key_record(&details.gamekey, tpk));
        }
        Ok(keys)
    }

    async fn reveal_key(&self, session: &Session, order_id: &str, gift: &GiftToken) -> Result<String, RemoteError> {
        let request = RevealRequest {
            keytype: &gift.machine_name,
            gamekey: order_id,
            keyindex: gift.key_index,
        };
        humble::reveal_key(&self.client, session.token(), &request)
            .await
            .map_err(remote_error)
    }

    async fn choice_months(&self, session: &Session) -> Result<Vec<ChoiceMonth>, RemoteError> {
        let summaries = humble::list_orders(&self.client, session.token())
            .await
            .map_err(remote_error)?;

        let mut months: Vec<Order> = Vec::new();
        for summary in summaries {
            match humble::order_details(&self.client, session.token(), &summary.gamekey).await {
                Ok(order) if order.is_unchosen_choice_month() => months.push(order),
                Ok(_) => {}
                Err(e) if e.is_unauthorized() => return Err(RemoteError::Unauthorized),
                Err(e) => warn!(order = %summary.gamekey, error = %e, "Skipping unreadable order"),
            }
        }
        months.sort_by(|a, b| a.created.cmp(&b.created));

        let mut pending = Vec::with_capacity(months.len());
        for month in months {
            let Some(choice_url) = month.product.choice_url.clone() else {
                warn!(order = %month.gamekey, "Choice month has no page");
                continue;
            };
            let offer = humble::month_choices(&self.client, session.token(), &choice_url)
                .await
                .map_err(remote_error)?;

            let taken: HashSet<&str> = month.tpks.iter().map(|t| t.machine_name.as_str()).collect();
            let options = offer
                .choices
                .into_iter()
                .filter(|c| c.machine_names.iter().all(|name| !taken.contains(name.as_str())))
                .map(|c| choice_option(&choice_url, c))
                .collect();

            pending.push(ChoiceMonth {
                order_id: month.gamekey,
                title: month.product.human_name,
                remaining: month.choices_remaining,
                offer_id: offer.parent_identifier,
                page_url: humble::month_page_url(&choice_url),
                options,
            });
        }
        Ok(pending)
    }

    async fn choose_content(
        &self,
        session: &Session,
        month: &ChoiceMonth,
        option: &ChoiceOption,
    ) -> Result<(), RemoteError> {
        let Some(gamekey) = option.claim_key.as_deref() else {
            return Err(RemoteError::Protocol(format!(
                "{} can only be claimed on the website",
                option.title
            )));
        };
        let request = ChooseRequest {
            gamekey,
            parent_identifier: &month.offer_id,
            display_name: &option.id,
        };
        humble::choose_content(&self.client, session.token(), &request)
            .await
            .map_err(remote_error)
    }
}

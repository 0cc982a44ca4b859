use async_trait::async_trait;
use reqwest::Client;
use storefronts::steam::{self, AuthSession, ConfirmationType, GuardCodeReply, PollOutcome};
use tracing::debug;

use super::remote_error;
use crate::remote::{
    ActivationResponse, CatalogApp, CatalogPage, CredentialLogin, EncryptedSecret, GuardCodeStatus,
    GuardKind, LoginGrant, OwnedIds, PasswordKey, PollHandle, PollStatus, QrChallenge,
    RemoteError, SessionProbe, TargetPlatformClient,
};
use crate::session::{Provider, Session};

/// Steam as the target platform. The session token is the store cookie
/// string.
#[derive(Clone)]
pub struct SteamClient {
    client: Client,
}

impl SteamClient {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

fn guard_kind(confirmation: ConfirmationType) -> Option<GuardKind> {
    match confirmation {
        ConfirmationType::None => Some(GuardKind::None),
        ConfirmationType::EmailCode => Some(GuardKind::EmailCode),
        ConfirmationType::DeviceCode => Some(GuardKind::DeviceCode),
        ConfirmationType::DeviceConfirmation => Some(GuardKind::DeviceConfirmation),
        ConfirmationType::EmailConfirmation => Some(GuardKind::EmailConfirmation),
        ConfirmationType::Unknown(other) => {
            debug!(confirmation = other, "Ignoring unknown confirmation type");
            None
        }
    }
}

fn confirmation_type(kind: GuardKind) -> ConfirmationType {
    match kind {
        GuardKind::None => ConfirmationType::None,
        GuardKind::EmailCode => ConfirmationType::EmailCode,
        GuardKind::DeviceCode => ConfirmationType::DeviceCode,
        GuardKind::DeviceConfirmation => ConfirmationType::DeviceConfirmation,
        GuardKind::EmailConfirmation => ConfirmationType::EmailConfirmation,
    }
}

fn poll_status(outcome: PollOutcome, request_id: &str) -> PollStatus {
    match outcome {
        PollOutcome::Approved {
            refresh_token,
            account_name,
        } => PollStatus::Granted(LoginGrant {
            refresh_token,
            account_name,
        }),
        PollOutcome::Expired { eresult } => {
            debug!(eresult, "Steam login request expired");
            PollStatus::Expired
        }
        PollOutcome::Pending {
            new_client_id,
            new_challenge_url,
        } => {
            let rotated = match (new_client_id, new_challenge_url) {
                (Some(client_id), Some(challenge_url)) => Some(QrChallenge {
                    challenge_url,
                    handle: PollHandle {
                        client_id,
                        request_id: request_id.to_string(),
                    },
                }),
                _ => None,
            };
            PollStatus::Pending { rotated }
        }
    }
}

fn activation_response(response: steam::RegisterKeyResponse) -> ActivationResponse {
    if response.success {
        return ActivationResponse::Activated {
            items: response.line_items,
        };
    }
    match response.result_detail {
        Some(code) => ActivationResponse::Failed { code },
        None => ActivationResponse::Unrecognized("failure without a result detail".to_string()),
    }
}

#[async_trait]
impl SessionProbe for SteamClient {
    async fn probe(&self, session: &Session) -> Result<bool, RemoteError> {
        steam::probe_store_session(&self.client, session.token())
            .await
            .map_err(remote_error)
    }
}

#[async_trait]
impl TargetPlatformClient for SteamClient {
    async fn begin_qr_login(&self) -> Result<QrChallenge, RemoteError> {
        let qr = steam::begin_auth_via_qr(&self.client)
            .await
            .map_err(remote_error)?;
        Ok(QrChallenge {
            challenge_url: qr.challenge_url,
            handle: PollHandle {
                client_id: qr.client_id,
                request_id: qr.request_id,
            },
        })
    }

    async fn fetch_password_key(&self, account: &str) -> Result<PasswordKey, RemoteError> {
        let key = steam::get_password_rsa_key(&self.client, account)
            .await
            .map_err(remote_error)?;
        Ok(PasswordKey {
            modulus_hex: key.publickey_mod,
            exponent_hex: key.publickey_exp,
            timestamp: key.timestamp,
        })
    }

    async fn begin_credential_login(
        &self,
        account: &str,
        secret: &EncryptedSecret,
    ) -> Result<Option<CredentialLogin>, RemoteError> {
        let session = steam::begin_auth_via_credentials(
            &self.client,
            account,
            &secret.ciphertext_b64,
            &secret.timestamp,
        )
        .await
        .map_err(remote_error)?;

        Ok(session.map(|s| CredentialLogin {
            handle: PollHandle {
                client_id: s.client_id,
                request_id: s.request_id,
            },
            account_id: s.steam_id,
            confirmations: s
                .allowed_confirmations
                .into_iter()
                .filter_map(guard_kind)
                .collect(),
        }))
    }

    async fn submit_guard_code(
        &self,
        login: &CredentialLogin,
        code: &str,
        kind: GuardKind,
    ) -> Result<GuardCodeStatus, RemoteError> {
        let session = AuthSession {
            client_id: login.handle.client_id.clone(),
            request_id: login.handle.request_id.clone(),
            steam_id: login.account_id.clone(),
            allowed_confirmations: Vec::new(),
        };
        let reply = steam::submit_guard_code(&self.client, &session, code, confirmation_type(kind))
            .await
            .map_err(remote_error)?;
        Ok(match reply {
            GuardCodeReply::Accepted => GuardCodeStatus::Accepted,
            GuardCodeReply::Rejected { eresult } => {
                debug!(eresult, "Steam guard code rejected");
                GuardCodeStatus::Rejected
            }
        })
    }

    async fn poll_login(&self, handle: &PollHandle) -> Result<PollStatus, RemoteError> {
        let outcome = steam::poll_auth_status(&self.client, &handle.client_id, &handle.request_id)
            .await
            .map_err(remote_error)?;
        Ok(poll_status(outcome, &handle.request_id))
    }

    async fn finalize(&self, grant: &LoginGrant) -> Result<Session, RemoteError> {
        let store = steam::finalize_login(&self.client, &grant.refresh_token)
            .await
            .map_err(remote_error)?;
        debug!(steam_id = %store.steam_id, "Store session established");
        Ok(Session::new(Provider::TargetPlatform, store.cookies))
    }

    async fn owned_ids(&self, session: &Session) -> Result<OwnedIds, RemoteError> {
        let owned = steam::owned_content(&self.client, session.token())
            .await
            .map_err(remote_error)?;
        Ok(OwnedIds {
            apps: owned.apps.into_iter().collect(),
            packages: owned.packages.into_iter().collect(),
        })
    }

    async fn catalog_page(&self, api_key: &str, after: Option<u64>) -> Result<CatalogPage, RemoteError> {
        let page = steam::get_app_list(&self.client, api_key, after)
            .await
            .map_err(remote_error)?;
        let next = if page.have_more_results {
            page.last_appid
        } else {
            None
        };
        Ok(CatalogPage {
            apps: page
                .apps
                .into_iter()
                .map(|app| CatalogApp {
                    id: app.appid,
                    title: app.name,
                })
                .collect(),
            next,
        })
    }

    async fn activate(&self, session: &Session, code: &str) -> Result<ActivationResponse, RemoteError> {
        let response = steam::register_key(&self.client, session.token(), code)
            .await
            .map_err(remote_error)?;
        Ok(activation_response(response))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_rotation() {
        let status = poll_status(
            PollOutcome::Pending {
                new_client_id: Some("2".to_string()),
                new_challenge_url: Some("https://s.team/q/1/2".to_string()),
            },
            "req",
        );
        match status {
            PollStatus::Pending { rotated: Some(challenge) } => {
                assert_eq!(challenge.handle.client_id, "2");
                assert_eq!(challenge.handle.request_id, "req");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_activation_response() {
        let failed = activation_response(steam::RegisterKeyResponse {
            success: false,
            result_detail: Some(53),
            line_items: Vec::new(),
        });
        assert_eq!(failed, ActivationResponse::Failed { code: 53 });

        let ok = activation_response(steam::RegisterKeyResponse {
            success: true,
            result_detail: Some(0),
            line_items: vec!["Game X".to_string()],
        });
        assert!(matches!(ok, ActivationResponse::Activated { .. }));
    }

    #[test]
    fn test_unknown_confirmations_are_dropped() {
        assert_eq!(guard_kind(ConfirmationType::Unknown(9)), None);
        assert_eq!(guard_kind(ConfirmationType::DeviceCode), Some(GuardKind::DeviceCode));
    }
}

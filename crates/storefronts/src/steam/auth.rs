//! `IAuthenticationService` calls.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::{ERESULT_OK, eresult, id_string, urls};
use crate::error::{StorefrontError, check_status};

const DEVICE_FRIENDLY_NAME: &str = "keyferry";

/// Public key Steam wants the password encrypted with.
///
/// Valid for a single submission; `timestamp` must be sent back with it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordRsaKey {
    /// Hex-encoded modulus.
    pub publickey_mod: String,
    /// Hex-encoded public exponent.
    pub publickey_exp: String,
    pub timestamp: String,
}

/// Ways Steam lets an account confirm a login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfirmationType {
    None,
    EmailCode,
    DeviceCode,
    DeviceConfirmation,
    EmailConfirmation,
    Unknown(i64),
}

impl From<i64> for ConfirmationType {
    fn from(value: i64) -> Self {
        match value {
            1 => Self::None,
            2 => Self::EmailCode,
            3 => Self::DeviceCode,
            4 => Self::DeviceConfirmation,
            5 => Self::EmailConfirmation,
            other => Self::Unknown(other),
        }
    }
}

impl ConfirmationType {
    /// The `code_type` value used when submitting a code for this confirmation.
    pub fn code_type(self) -> Option<i64> {
        match self {
            Self::EmailCode => Some(2),
            Self::DeviceCode => Some(3),
            _ => None,
        }
    }
}

/// A credential login awaiting confirmation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSession {
    pub client_id: String,
    pub request_id: String,
    pub steam_id: String,
    pub allowed_confirmations: Vec<ConfirmationType>,
}

/// A QR login awaiting approval from the mobile app.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrSession {
    pub client_id: String,
    pub request_id: String,
    pub challenge_url: String,
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Not approved yet. Steam rotates QR challenges, in which case the new
    /// client id and URL are returned.
    Pending {
        new_client_id: Option<String>,
        new_challenge_url: Option<String>,
    },
    Approved {
        refresh_token: String,
        account_name: Option<String>,
    },
    /// The login attempt is gone (timed out or denied on the device).
    Expired { eresult: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardCodeReply {
    Accepted,
    Rejected { eresult: i64 },
}

fn response_body(body: &Value) -> &Value {
    body.get("response").unwrap_or(body)
}

/// Fetch the RSA key for `account_name`.
pub async fn get_password_rsa_key(
    client: &Client,
    account_name: &str,
) -> Result<PasswordRsaKey, StorefrontError> {
    let url = format!(
        "{}/IAuthenticationService/GetPasswordRSAPublicKey/v1",
        urls::API
    );
    let response = client
        .get(&url)
        .query(&[("account_name", account_name)])
        .send()
        .await?;
    check_status(response.status())?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;
    serde_json::from_value(response_body(&body).clone())
        .map_err(|e| StorefrontError::Parse(format!("rsa key: {}", e)))
}

/// Start a credential login.
///
/// Returns `Ok(None)` when Steam refuses the account name or password.
pub async fn begin_auth_via_credentials(
    client: &Client,
    account_name: &str,
    encrypted_password: &str,
    encryption_timestamp: &str,
) -> Result<Option<AuthSession>, StorefrontError> {
    let url = format!(
        "{}/IAuthenticationService/BeginAuthSessionViaCredentials/v1",
        urls::API
    );
    let params = [
        ("persistence", "1"),
        ("encrypted_password", encrypted_password),
        ("account_name", account_name),
        ("encryption_timestamp", encryption_timestamp),
        ("device_friendly_name", DEVICE_FRIENDLY_NAME),
    ];
    let response = client.post(&url).form(&params).send().await?;
    check_status(response.status())?;
    let result = eresult(response.headers());

    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;
    debug!(?result, "Steam credential session reply");
    Ok(parse_auth_session(response_body(&body)))
}

fn parse_auth_session(body: &Value) -> Option<AuthSession> {
    let client_id = id_string(body.get("client_id"))?;
    let request_id = id_string(body.get("request_id"))?;
    let steam_id = id_string(body.get("steamid")).unwrap_or_default();
    let allowed_confirmations = body
        .get("allowed_confirmations")
        .and_then(|a| a.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|c| c.get("confirmation_type").and_then(|t| t.as_i64()))
                .map(ConfirmationType::from)
                .collect()
        })
        .unwrap_or_default();

    Some(AuthSession {
        client_id,
        request_id,
        steam_id,
        allowed_confirmations,
    })
}

/// Start a QR login.
pub async fn begin_auth_via_qr(client: &Client) -> Result<QrSession, StorefrontError> {
    let url = format!("{}/IAuthenticationService/BeginAuthSessionViaQR/v1", urls::API);
    let response = client
        .post(&url)
        .form(&[("device_friendly_name", DEVICE_FRIENDLY_NAME)])
        .send()
        .await?;
    check_status(response.status())?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;
    let body = response_body(&body);

    let client_id = id_string(body.get("client_id"))
        .ok_or_else(|| StorefrontError::parse("QR session has no client_id"))?;
    let request_id = id_string(body.get("request_id"))
        .ok_or_else(|| StorefrontError::parse("QR session has no request_id"))?;
    let challenge_url = body
        .get("challenge_url")
        .and_then(|u| u.as_str())
        .ok_or_else(|| StorefrontError::parse("QR session has no challenge_url"))?
        .to_string();

    Ok(QrSession {
        client_id,
        request_id,
        challenge_url,
    })
}

/// Poll a pending login.
pub async fn poll_auth_status(
    client: &Client,
    client_id: &str,
    request_id: &str,
) -> Result<PollOutcome, StorefrontError> {
    let url = format!("{}/IAuthenticationService/PollAuthSessionStatus/v1", urls::API);
    let response = client
        .post(&url)
        .form(&[("client_id", client_id), ("request_id", request_id)])
        .send()
        .await?;
    check_status(response.status())?;
    let result = eresult(response.headers());

    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;
    Ok(parse_poll(response_body(&body), result))
}

fn parse_poll(body: &Value, result: Option<i64>) -> PollOutcome {
    if let Some(refresh_token) = body
        .get("refresh_token")
        .and_then(|t| t.as_str())
        .filter(|t| !t.is_empty())
    {
        return PollOutcome::Approved {
            refresh_token: refresh_token.to_string(),
            account_name: body
                .get("account_name")
                .and_then(|a| a.as_str())
                .map(String::from),
        };
    }

    match result {
        Some(code) if code != ERESULT_OK => PollOutcome::Expired { eresult: code },
        _ => PollOutcome::Pending {
            new_client_id: id_string(body.get("new_client_id")),
            new_challenge_url: body
                .get("new_challenge_url")
                .and_then(|u| u.as_str())
                .map(String::from),
        },
    }
}

/// Submit an emailed or authenticator code for a credential login.
pub async fn submit_guard_code(
    client: &Client,
    session: &AuthSession,
    code: &str,
    confirmation: ConfirmationType,
) -> Result<GuardCodeReply, StorefrontError> {
    let code_type = confirmation
        .code_type()
        .ok_or_else(|| StorefrontError::parse("confirmation type takes no code"))?
        .to_string();
    let url = format!(
        "{}/IAuthenticationService/UpdateAuthSessionWithSteamGuardCode/v1",
        urls::API
    );
    let params = [
        ("client_id", session.client_id.as_str()),
        ("steamid", session.steam_id.as_str()),
        ("code", code),
        ("code_type", code_type.as_str()),
    ];
    let response = client.post(&url).form(&params).send().await?;
    check_status(response.status())?;

    Ok(match eresult(response.headers()) {
        Some(code) if code != ERESULT_OK => GuardCodeReply::Rejected { eresult: code },
        _ => GuardCodeReply::Accepted,
    })
}

//! Store session finalization.
//!
//! The refresh token from an approved login is posted to `finalizelogin`,
//! which answers with per-domain transfer URLs. Posting to the store's
//! transfer URL sets `steamLoginSecure` for the store.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{id_string, urls};
use crate::cookie_utils::{extract_cookie_value, merge_response_cookies, rebuild_cookies};
use crate::error::{StorefrontError, check_status};

const STORE_HOST: &str = "store.steampowered.com";

/// Cookies authenticating the Steam store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSession {
    pub cookies: String,
    pub steam_id: String,
}

fn random_session_id() -> String {
    let high: u64 = rand::random();
    let low: u32 = rand::random();
    let mut bytes = high.to_be_bytes().to_vec();
    bytes.extend_from_slice(&low.to_be_bytes());
    hex::encode(bytes)
}

/// Exchange a refresh token for store cookies.
pub async fn finalize_login(
    client: &Client,
    refresh_token: &str,
) -> Result<StoreSession, StorefrontError> {
    let landing = client.get(urls::STORE).send().await?;
    let mut cookies = merge_response_cookies("", landing.headers());

    let session_id = match extract_cookie_value(&cookies, "sessionid") {
        Some(id) => id,
        None => {
            let id = random_session_id();
            let mut updates = std::collections::HashMap::new();
            updates.insert("sessionid".to_string(), id.clone());
            cookies = rebuild_cookies(&cookies, &updates);
            id
        }
    };

    let finalize_url = format!("{}/jwt/finalizelogin", urls::LOGIN);
    let redir = format!("{}/login/home/?goto=", urls::STORE);
    let response = client
        .post(&finalize_url)
        .form(&[
            ("nonce", refresh_token),
            ("sessionid", session_id.as_str()),
            ("redir", redir.as_str()),
        ])
        .send()
        .await?;
    check_status(response.status())?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;

    if let Some(error) = body.get("error").and_then(|e| e.as_i64()) {
        return Err(StorefrontError::Api {
            code: error,
            message: "finalizelogin refused the refresh token".to_string(),
        });
    }

    let steam_id = id_string(body.get("steamID"))
        .ok_or_else(|| StorefrontError::parse("finalizelogin has no steamID"))?;
    let transfers = body
        .get("transfer_info")
        .and_then(|t| t.as_array())
        .cloned()
        .unwrap_or_default();

    let mut fallback_auth = None;
    for transfer in &transfers {
        let Some(url) = transfer.get("url").and_then(|u| u.as_str()) else {
            continue;
        };
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(String::from));
        if host.as_deref() != Some(STORE_HOST) {
            continue;
        }

        let mut params: Vec<(String, String)> = transfer
            .get("params")
            .and_then(|p| p.as_object())
            .map(|p| {
                p.iter()
                    .filter_map(|(k, v)| {
                        let value = v.as_str().map(String::from).or_else(|| id_string(Some(v)))?;
                        Some((k.clone(), value))
                    })
                    .collect()
            })
            .unwrap_or_default();
        fallback_auth = params
            .iter()
            .find(|(k, _)| k == "auth")
            .map(|(_, v)| v.clone());
        params.push(("steamID".to_string(), steam_id.clone()));

        let transfer_response = client.post(url).form(&params).send().await?;
        debug!(status = %transfer_response.status(), "Steam store transfer");
        cookies = merge_response_cookies(&cookies, transfer_response.headers());
    }

    if extract_cookie_value(&cookies, "steamLoginSecure").is_none() {
        let auth = fallback_auth.ok_or_else(|| {
            StorefrontError::parse("no store transfer in finalizelogin reply")
        })?;
        info!("Store transfer set no login cookie, building it from the transfer token");
        let mut updates = std::collections::HashMap::new();
        updates.insert(
            "steamLoginSecure".to_string(),
            format!("{}%7C%7C{}", steam_id, auth),
        );
        cookies = rebuild_cookies(&cookies, &updates);
    }

    if !probe_store_session(client, &cookies).await? {
        warn!("Store did not accept the finalized session");
        return Err(StorefrontError::Unauthorized);
    }

    Ok(StoreSession { cookies, steam_id })
}

/// Check whether store cookies still open the key registration page.
pub async fn probe_store_session(client: &Client, cookies: &str) -> Result<bool, StorefrontError> {
    let response = client
        .get(urls::REGISTER_KEY_PAGE)
        .header(reqwest::header::COOKIE, cookies)
        .send()
        .await?;

    let status = response.status();
    debug!(%status, "Steam store session probe");
    match check_status(status) {
        Ok(()) => Ok(true),
        Err(StorefrontError::Unauthorized) => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_session_id() {
        let id = random_session_id();
        assert_eq!(id.len(), 24);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

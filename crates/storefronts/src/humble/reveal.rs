//! Key reveal.
//!
//! Revealing turns a gift link into a plain key and cannot be undone.

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{ACCEPT_JSON, CSRF_HEADER, csrf_token, urls};
use crate::error::{StorefrontError, check_status};

/// Identifies the key to reveal.
#[derive(Debug, Clone)]
pub struct RevealRequest<'a> {
    /// The tpk's `machine_name`.
    pub keytype: &'a str,
    /// The order's gamekey.
    pub gamekey: &'a str,
    pub keyindex: u32,
}

/// Reveal a key and return its value.
pub async fn reveal_key(
    client: &Client,
    cookies: &str,
    request: &RevealRequest<'_>,
) -> Result<String, StorefrontError> {
    let csrf = csrf_token(cookies)?;
    let params = [
        ("keytype", request.keytype.to_string()),
        ("key", request.gamekey.to_string()),
        ("keyindex", request.keyindex.to_string()),
    ];

    let response = client
        .post(urls::REDEEM_API)
        .header(reqwest::header::COOKIE, cookies)
        .header(reqwest::header::ACCEPT, ACCEPT_JSON)
        .header(CSRF_HEADER, csrf)
        .form(&params)
        .send()
        .await?;
    check_status(response.status())?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;
    debug!(keytype = request.keytype, "Humble reveal reply received");
    parse_reveal(&body)
}

fn parse_reveal(body: &Value) -> Result<String, StorefrontError> {
    let success = body.get("success").and_then(|s| s.as_bool()).unwrap_or(false);
    if let Some(message) = body.get("error_msg").and_then(|m| m.as_str()) {
        return Err(StorefrontError::Api {
            code: -1,
            message: message.to_string(),
        });
    }
    if !success {
        return Err(StorefrontError::Api {
            code: -1,
            message: "reveal was not successful".to_string(),
        });
    }
    body.get("key")
        .and_then(|k| k.as_str())
        .map(String::from)
        .ok_or_else(|| StorefrontError::parse("reveal reply carries no key"))
}

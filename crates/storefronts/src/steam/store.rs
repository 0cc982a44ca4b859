//! Store endpoints used with an authenticated session.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::urls;
use crate::cookie_utils::extract_cookie_value;
use crate::error::{StorefrontError, check_status};

/// Owned app and package ids of the logged-in account.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OwnedContent {
    #[serde(rename = "rgOwnedApps", default)]
    pub apps: Vec<u64>,
    #[serde(rename = "rgOwnedPackages", default)]
    pub packages: Vec<u64>,
}

/// Reply of `ajaxregisterkey`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterKeyResponse {
    pub success: bool,
    /// Purchase result detail; 0 or absent on success.
    pub result_detail: Option<i64>,
    /// Names of what the key granted.
    pub line_items: Vec<String>,
}

pub async fn owned_content(client: &Client, cookies: &str) -> Result<OwnedContent, StorefrontError> {
    let response = client
        .get(urls::USERDATA_API)
        .header(reqwest::header::COOKIE, cookies)
        .send()
        .await?;
    check_status(response.status())?;

    response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))
}

/// Register a product key on the account.
pub async fn register_key(
    client: &Client,
    cookies: &str,
    product_key: &str,
) -> Result<RegisterKeyResponse, StorefrontError> {
    let session_id =
        extract_cookie_value(cookies, "sessionid").ok_or(StorefrontError::Unauthorized)?;

    let response = client
        .post(urls::REGISTER_KEY_API)
        .header(reqwest::header::COOKIE, cookies)
        .form(&[("product_key", product_key), ("sessionid", session_id.as_str())])
        .send()
        .await?;
    check_status(response.status())?;

    let text = response.text().await?;
    let body: Value = serde_json::from_str(&text)
        .map_err(|e| StorefrontError::Parse(format!("register key reply: {}", e)))?;
    parse_register_response(&body)
}

/// Parse a register key reply.
///
/// Steam puts the failure detail in `purchase_result_details`, or in
/// `purchase_receipt_info.result_detail` on older replies.
pub fn parse_register_response(body: &Value) -> Result<RegisterKeyResponse, StorefrontError> {
    let success = body
        .get("success")
        .and_then(|s| s.as_i64())
        .ok_or_else(|| StorefrontError::parse("register key reply has no success field"))?
        == 1;

    let receipt = body.get("purchase_receipt_info");
    let result_detail = body
        .get("purchase_result_details")
        .and_then(|d| d.as_i64())
        .or_else(|| {
            receipt
                .and_then(|r| r.get("result_detail"))
                .and_then(|d| d.as_i64())
        });

    let line_items = receipt
        .and_then(|r| r.get("line_items"))
        .and_then(|l| l.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|i| i.get("line_item_description").and_then(|d| d.as_str()))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(RegisterKeyResponse {
        success,
        result_detail,
        line_items,
    })
}

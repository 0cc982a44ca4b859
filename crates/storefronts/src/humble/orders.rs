//! Order listing and order details.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{ACCEPT_JSON, urls};
use crate::error::{StorefrontError, check_status};

/// Entry of the account's order list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSummary {
    pub gamekey: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderProduct {
    #[serde(default)]
    pub human_name: String,
    #[serde(default)]
    pub is_humble_choice: bool,
    /// Path segment of the month's page under `/subscription/`.
    #[serde(default)]
    pub choice_url: Option<String>,
}

/// One third-party key ("tpk") inside an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tpk {
    pub machine_name: String,
    #[serde(default)]
    pub gamekey: Option<String>,
    #[serde(default)]
    pub keyindex: u32,
    #[serde(default)]
    pub human_name: String,
    #[serde(default)]
    pub key_type: Option<String>,
    #[serde(default)]
    pub steam_app_id: Option<u64>,
    /// Present only once the key has been revealed.
    #[serde(default)]
    pub redeemed_key_val: Option<String>,
    #[serde(default)]
    pub is_gift: bool,
    #[serde(default)]
    pub is_expired: bool,
}

impl Tpk {
    /// Whether the key activates on Steam.
    pub fn is_steam(&self) -> bool {
        self.key_type.as_deref() == Some("steam") || self.steam_app_id.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Order {
    pub gamekey: String,
    pub product: OrderProduct,
    pub created: Option<String>,
    /// Games still to pick, for Humble Choice months.
    pub choices_remaining: u32,
    pub tpks: Vec<Tpk>,
}

impl Order {
    pub fn is_unchosen_choice_month(&self) -> bool {
        self.product.is_humble_choice && self.choices_remaining > 0
    }
}

/// Fetch the list of orders of the logged-in account.
pub async fn list_orders(
    client: &Client,
    cookies: &str,
) -> Result<Vec<OrderSummary>, StorefrontError> {
    let response = client
        .get(urls::ORDERS_API)
        .header(reqwest::header::COOKIE, cookies)
        .header(reqwest::header::ACCEPT, ACCEPT_JSON)
        .send()
        .await?;
    check_status(response.status())?;

    response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))
}

/// Fetch one order with all of its keys.
pub async fn order_details(
    client: &Client,
    cookies: &str,
    gamekey: &str,
) -> Result<Order, StorefrontError> {
    let url = format!("{}{}", urls::ORDER_DETAILS_API, gamekey);
    let response = client
        .get(&url)
        .query(&[("all_tpkds", "true")])
        .header(reqwest::header::COOKIE, cookies)
        .header(reqwest::header::ACCEPT, ACCEPT_JSON)
        .send()
        .await?;
    check_status(response.status())?;

    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;
    parse_order(body)
}

/// Parse an order details body.
///
/// Keys are read from `tpkd_dict.all_tpks`; an order without that section
/// (pure DRM-free bundles) has no keys.
pub fn parse_order(body: Value) -> Result<Order, StorefrontError> {
    let gamekey = body
        .get("gamekey")
        .and_then(|g| g.as_str())
        .ok_or_else(|| StorefrontError::parse("order has no gamekey"))?
        .to_string();

    let product = match body.get("product") {
        Some(p) if !p.is_null() => serde_json::from_value(p.clone())
            .map_err(|e| StorefrontError::Parse(e.to_string()))?,
        _ => OrderProduct::default(),
    };

    let created = body
        .get("created")
        .and_then(|c| c.as_str())
        .map(String::from);

    let choices_remaining = body
        .get("choices_remaining")
        .and_then(|c| c.as_u64())
        .unwrap_or(0) as u32;

    let tpks = match body.get("tpkd_dict").and_then(|d| d.get("all_tpks")) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                serde_json::from_value::<Tpk>(item.clone())
                    .map_err(|e| StorefrontError::Parse(format!("bad tpk in {}: {}", gamekey, e)))
            })
            .collect::<Result<Vec<_>, _>>()?,
        _ => Vec::new(),
    };

    Ok(Order {
        gamekey,
        product,
        created,
        choices_remaining,
        tpks,
    })
}

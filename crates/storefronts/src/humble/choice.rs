//! Humble Choice months: the games on offer and picking them.
//!
//! A month's offer is not served by the JSON API. The subscription page
//! embeds it as a JSON blob in a `<script>` tag, keyed by a "parent
//! identifier" (`initial` for current plans, `initial-classic` for legacy
//! ones). Picking a game posts that identifier back to `choosecontent`.

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{ACCEPT_JSON, CSRF_HEADER, csrf_token, urls};
use crate::error::{StorefrontError, check_status};

const MONTH_DATA_OPEN: &str = r#"<script id="webpack-monthly-product-data" type="application/json">"#;
const MONTH_DATA_CLOSE: &str = "</script>";
const PREFERRED_IDENTIFIERS: [&str; 2] = ["initial", "initial-classic"];

/// One game offered in a month.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentChoice {
    /// `display_item_machine_name`, the identifier posted when choosing.
    pub display_name: String,
    pub title: String,
    /// Gamekey to claim under; absent when the game can only be taken on
    /// the website.
    pub gamekey: Option<String>,
    pub review_text: Option<String>,
    pub steam_percent: Option<f64>,
    /// Every `machine_name` nested in the choice, to tell it was taken.
    pub machine_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MonthChoices {
    pub parent_identifier: String,
    pub choices: Vec<ContentChoice>,
}

/// Page of a month under the subscription site.
pub fn month_page_url(choice_url: &str) -> String {
    format!("{}{}", urls::SUBSCRIPTION_PAGE, choice_url)
}

/// Page of one game of a month, where it can be claimed by hand.
pub fn choice_page_url(choice_url: &str, display_name: &str) -> String {
    format!("{}{}/{}", urls::SUBSCRIPTION_PAGE, choice_url, display_name)
}

/// Load the games on offer for the month at `choice_url`.
pub async fn month_choices(
    client: &Client,
    cookies: &str,
    choice_url: &str,
) -> Result<MonthChoices, StorefrontError> {
    let response = client
        .get(month_page_url(choice_url))
        .header(reqwest::header::COOKIE, cookies)
        .send()
        .await?;
    check_status(response.status())?;

    let html = response.text().await?;
    parse_month_page(&html)
}

/// Extract the offer from a month's page.
pub fn parse_month_page(html: &str) -> Result<MonthChoices, StorefrontError> {
    let start = html
        .find(MONTH_DATA_OPEN)
        .map(|i| i + MONTH_DATA_OPEN.len())
        .ok_or_else(|| StorefrontError::parse("month page has no product data"))?;
    let end = html[start..]
        .find(MONTH_DATA_CLOSE)
        .map(|i| start + i)
        .ok_or_else(|| StorefrontError::parse("unterminated product data"))?;

    let data: Value = serde_json::from_str(html[start..end].trim())
        .map_err(|e| StorefrontError::Parse(format!("month product data: {}", e)))?;
    let sections = data
        .pointer("/contentChoiceOptions/contentChoiceData")
        .and_then(|d| d.as_object())
        .ok_or_else(|| StorefrontError::parse("month data has no contentChoiceData"))?;

    let has_choices = |key: &str| {
        sections
            .get(key)
            .and_then(|s| s.get("content_choices"))
            .is_some_and(|c| c.is_object())
    };
    let parent_identifier = PREFERRED_IDENTIFIERS
        .iter()
        .map(|id| id.to_string())
        .find(|id| has_choices(id.as_str()))
        .or_else(|| sections.keys().find(|k| has_choices(k.as_str())).cloned())
        .ok_or_else(|| StorefrontError::parse("month data offers no content choices"))?;

    let mut choices = Vec::new();
    let offered = sections
        .get(&parent_identifier)
        .and_then(|s| s.get("content_choices"));
    if let Some(Value::Object(entries)) = offered {
        for (key, entry) in entries {
            choices.push(parse_choice(key, entry));
        }
    }
    debug!(identifier = %parent_identifier, choices = choices.len(), "Parsed month offer");

    Ok(MonthChoices {
        parent_identifier,
        choices,
    })
}

fn parse_choice(key: &str, entry: &Value) -> ContentChoice {
    let text = |field: &str| entry.get(field).and_then(|v| v.as_str()).map(String::from);
    let rating = entry.get("user_rating");

    let mut machine_names = Vec::new();
    collect_machine_names(entry, &mut machine_names);

    ContentChoice {
        display_name: text("display_item_machine_name").unwrap_or_else(|| key.to_string()),
        title: text("title").unwrap_or_else(|| key.to_string()),
        gamekey: entry
            .pointer("/tpkds/0/gamekey")
            .and_then(|g| g.as_str())
            .map(String::from),
        review_text: rating
            .and_then(|r| r.get("review_text"))
            .and_then(|t| t.as_str())
            .map(|t| t.replace('_', " ")),
        steam_percent: rating
            .and_then(|r| r.get("steam_percent|decimal"))
            .and_then(|p| p.as_f64()),
        machine_names,
    }
}

fn collect_machine_names(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                match (key.as_str(), child) {
                    ("machine_name", Value::String(name)) => out.push(name.clone()),
                    _ => collect_machine_names(child, out),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_machine_names(item, out)),
        _ => {}
    }
}

/// Identifies one game to claim.
#[derive(Debug, Clone)]
pub struct ChooseRequest<'a> {
    pub gamekey: &'a str,
    pub parent_identifier: &'a str,
    pub display_name: &'a str,
}

/// Claim one game of a month.
pub async fn choose_content(
    client: &Client,
    cookies: &str,
    request: &ChooseRequest<'_>,
) -> Result<(), StorefrontError> {
    let csrf = csrf_token(cookies)?;
    let params = [
        ("gamekey", request.gamekey),
        ("parent_identifier", request.parent_identifier),
        ("chosen_identifiers[]", request.display_name),
        ("is_multikey_and_from_choice_modal", "false"),
    ];

    let response = client
        .post(urls::CHOOSE_CONTENT_API)
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
    parse_choose_reply(&body)
}

fn parse_choose_reply(body: &Value) -> Result<(), StorefrontError> {
    if body.get("success").and_then(|s| s.as_bool()) == Some(true) {
        return Ok(());
    }
    let message = body
        .get("errors")
        .or_else(|| body.get("error_msg"))
        .map(|e| match e {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .unwrap_or_else(|| "choice was not accepted".to_string());
    Err(StorefrontError::Api { code: -1, message })
}

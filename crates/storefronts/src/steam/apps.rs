//! `IStoreService/GetAppList`, the name source for owned app ids.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::urls;
use crate::error::StorefrontError;

const MAX_RESULTS: &str = "50000";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSummary {
    pub appid: u64,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppListPage {
    #[serde(default)]
    pub apps: Vec<AppSummary>,
    #[serde(default)]
    pub have_more_results: bool,
    #[serde(default)]
    pub last_appid: Option<u64>,
}

/// Fetch one page of the store app list, starting after `last_appid`.
pub async fn get_app_list(
    client: &Client,
    api_key: &str,
    last_appid: Option<u64>,
) -> Result<AppListPage, StorefrontError> {
    let mut params = vec![
        ("key", api_key.to_string()),
        ("include_games", "true".to_string()),
        ("include_dlc", "true".to_string()),
        ("include_software", "true".to_string()),
        ("max_results", MAX_RESULTS.to_string()),
    ];
    if let Some(last) = last_appid {
        params.push(("last_appid", last.to_string()));
    }

    let response = client.get(urls::APP_LIST_API).query(&params).send().await?;
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(StorefrontError::Api {
            code: status.as_u16() as i64,
            message: "web API key rejected".to_string(),
        });
    }
    if !status.is_success() {
        return Err(StorefrontError::Status(status));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;
    let page = body.get("response").cloned().unwrap_or(Value::Null);
    if page.is_null() {
        return Ok(AppListPage::default());
    }
    serde_json::from_value(page).map_err(|e| StorefrontError::Parse(format!("app list: {}", e)))
}

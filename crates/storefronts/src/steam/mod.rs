//! Steam web endpoints.
//!
//! Login goes through Valve's `IAuthenticationService`, which hands out a
//! refresh token once a credential or QR session is approved. The refresh
//! token is then exchanged for store cookies by [`finalize_login`].

mod apps;
mod auth;
mod session;
mod store;

pub use apps::{AppListPage, AppSummary, get_app_list};
pub use auth::{
    AuthSession, ConfirmationType, GuardCodeReply, PasswordRsaKey, PollOutcome, QrSession,
    begin_auth_via_credentials, begin_auth_via_qr, get_password_rsa_key, poll_auth_status,
    submit_guard_code,
};
pub use session::{StoreSession, finalize_login, probe_store_session};
pub use store::{OwnedContent, RegisterKeyResponse, owned_content, parse_register_response, register_key};

pub(crate) mod urls {
    pub const API: &str = "https://api.steampowered.com";
    pub const LOGIN: &str = "https://login.steampowered.com";
    pub const STORE: &str = "https://store.steampowered.com";
    pub const REGISTER_KEY_PAGE: &str = "https://store.steampowered.com/account/registerkey";
    pub const REGISTER_KEY_API: &str = "https://store.steampowered.com/account/ajaxregisterkey/";
    pub const USERDATA_API: &str = "https://store.steampowered.com/dynamicstore/userdata/";
    pub const APP_LIST_API: &str = "https://api.steampowered.com/IStoreService/GetAppList/v1/";
}

/// Valve's result code header.
const ERESULT_HEADER: &str = "x-eresult";

/// `EResult::OK`.
pub const ERESULT_OK: i64 = 1;

fn eresult(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get(ERESULT_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Read a JSON field that Valve may encode either as a number or a string
/// (64-bit ids are usually strings).
pub(crate) fn id_string(value: Option<&serde_json::Value>) -> Option<String> {
    match value? {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

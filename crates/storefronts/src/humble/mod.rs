//! Humble Bundle website endpoints.

mod choice;
mod login;
mod orders;
mod reveal;

pub use choice::{
    ChooseRequest, ContentChoice, MonthChoices, choice_page_url, choose_content, month_choices,
    month_page_url, parse_month_page,
};
pub use login::{
    HumbleFactor, LoginForm, LoginReply, LoginResponse, parse_login_reply, start_login,
    submit_login,
};
pub use orders::{Order, OrderProduct, OrderSummary, Tpk, list_orders, order_details, parse_order};
pub use reveal::{RevealRequest, reveal_key};

use reqwest::Client;
use tracing::debug;

use crate::cookie_utils::extract_cookie_value;
use crate::error::{StorefrontError, check_status};

pub(crate) mod urls {
    pub const LOGIN_PAGE: &str = "https://www.humblebundle.com/login";
    pub const LOGIN_API: &str = "https://www.humblebundle.com/processlogin";
    pub const LIBRARY_PAGE: &str = "https://www.humblebundle.com/home/library";
    pub const ORDERS_API: &str = "https://www.humblebundle.com/api/v1/user/order";
    pub const ORDER_DETAILS_API: &str = "https://www.humblebundle.com/api/v1/order/";
    pub const REDEEM_API: &str = "https://www.humblebundle.com/humbler/redeemkey";
    pub const SUBSCRIPTION_PAGE: &str = "https://www.humblebundle.com/subscription/";
    pub const CHOOSE_CONTENT_API: &str = "https://www.humblebundle.com/humbler/choosecontent";
}

/// Cookie carrying the CSRF token Humble expects echoed in a header.
pub const CSRF_COOKIE: &str = "csrf_cookie";

const CSRF_HEADER: &str = "CSRF-Prevention-Token";
const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";

/// Check whether a saved cookie string still opens the library page.
pub async fn probe_session(client: &Client, cookies: &str) -> Result<bool, StorefrontError> {
    let response = client
        .get(urls::LIBRARY_PAGE)
        .header(reqwest::header::COOKIE, cookies)
        .send()
        .await?;

    let status = response.status();
    debug!(%status, "Humble session probe");
    match check_status(status) {
        Ok(()) => Ok(true),
        Err(StorefrontError::Unauthorized) => Ok(false),
        Err(e) => Err(e),
    }
}

fn csrf_token(cookies: &str) -> Result<String, StorefrontError> {
    extract_cookie_value(cookies, CSRF_COOKIE)
        .ok_or_else(|| StorefrontError::parse("missing csrf_cookie"))
}

//! Humble Bundle password login.
//!
//! The login form is posted to `processlogin` with the CSRF token from the
//! login page's cookie. Humble answers with JSON flags: `humble_guard_required`
//! asks for the code it just emailed, `two_factor_required` asks for a TOTP
//! code. The same form is re-posted with the code attached.

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::{ACCEPT_JSON, CSRF_HEADER, csrf_token, urls};
use crate::cookie_utils::merge_response_cookies;
use crate::error::StorefrontError;

/// Second factors Humble may ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HumbleFactor {
    /// Code emailed by Humble Guard.
    Guard,
    /// Authenticator app code.
    Totp,
}

/// Fields of the login form.
#[derive(Debug, Clone, Default)]
pub struct LoginForm<'a> {
    pub username: &'a str,
    pub password: &'a str,
    pub guard: Option<&'a str>,
    pub code: Option<&'a str>,
}

impl LoginForm<'_> {
    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("access_token", String::new()),
            ("access_token_provider_id", String::new()),
            ("goto", "/".to_string()),
            ("qs", String::new()),
            ("username", self.username.to_string()),
            ("password", self.password.to_string()),
        ];
        if let Some(guard) = self.guard {
            params.push(("guard", guard.to_uppercase()));
        }
        if let Some(code) = self.code {
            params.push(("code", code.to_string()));
        }
        params
    }
}

/// Interpretation of a `processlogin` reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginReply {
    Success,
    SecondFactorRequired {
        factor: HumbleFactor,
        /// The form already carried a code for this factor and it was refused.
        code_rejected: bool,
    },
    Rejected(String),
    TermsOptInRequired,
    Unexpected(String),
}

#[derive(Debug, Clone)]
pub struct LoginResponse {
    pub reply: LoginReply,
    /// Cookie string with everything the reply set merged in.
    pub cookies: String,
}

/// Open the login page to obtain the anonymous session and CSRF cookies.
pub async fn start_login(client: &Client) -> Result<String, StorefrontError> {
    let response = client.get(urls::LOGIN_PAGE).send().await?;
    let cookies = merge_response_cookies("", response.headers());
    csrf_token(&cookies)?;
    Ok(cookies)
}

/// Post the login form.
pub async fn submit_login(
    client: &Client,
    cookies: &str,
    form: &LoginForm<'_>,
) -> Result<LoginResponse, StorefrontError> {
    let csrf = csrf_token(cookies)?;

    let response = client
        .post(urls::LOGIN_API)
        .header(reqwest::header::COOKIE, cookies)
        .header(reqwest::header::ACCEPT, ACCEPT_JSON)
        .header(CSRF_HEADER, csrf)
        .form(&form.to_params())
        .send()
        .await?;

    let status = response.status();
    let cookies = merge_response_cookies(cookies, response.headers());
    let body: Value = response
        .json()
        .await
        .map_err(|e| StorefrontError::Parse(e.to_string()))?;

    let reply = parse_login_reply(status.is_success(), &body, form);
    debug!(%status, ?reply, "Humble login reply");
    Ok(LoginResponse { reply, cookies })
}

fn flag_set(body: &Value, name: &str) -> bool {
    match body.get(name) {
        None | Some(Value::Null) | Some(Value::Bool(false)) => false,
        Some(_) => true,
    }
}

/// Classify a `processlogin` JSON body.
pub fn parse_login_reply(status_ok: bool, body: &Value, form: &LoginForm<'_>) -> LoginReply {
    let errors = body.get("errors").filter(|e| !e.is_null());

    if let Some(message) = errors
        .and_then(|e| e.get("username"))
        .and_then(|u| u.get(0))
        .and_then(|m| m.as_str())
    {
        return LoginReply::Rejected(message.to_string());
    }

    let needs_opt_in = body
        .get("user_terms_opt_in_data")
        .and_then(|d| d.get("needs_to_opt_in"))
        .and_then(|n| n.as_bool())
        .unwrap_or(false);
    if needs_opt_in {
        return LoginReply::TermsOptInRequired;
    }

    if flag_set(body, "humble_guard_required") {
        return LoginReply::SecondFactorRequired {
            factor: HumbleFactor::Guard,
            code_rejected: form.guard.is_some(),
        };
    }

    if flag_set(body, "two_factor_required") {
        return LoginReply::SecondFactorRequired {
            factor: HumbleFactor::Totp,
            code_rejected: form.code.is_some(),
        };
    }

    if let Some(errors) = errors {
        let empty = errors.as_object().is_some_and(|o| o.is_empty());
        if !empty {
            return LoginReply::Unexpected(errors.to_string());
        }
    }

    if !status_ok {
        return LoginReply::Unexpected("login request was not accepted".to_string());
    }

    LoginReply::Success
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn form() -> LoginForm<'static> {
        LoginForm {
            username: "user@example.com",
            password: "hunter2",
            ..Default::default()
        }
    }

    #[test]
    fn test_bad_credentials() {
        let body = json!({"errors": {"username": ["Incorrect email or password."]}});
        assert_eq!(
            parse_login_reply(false, &body, &form()),
            LoginReply::Rejected("Incorrect email or password.".to_string())
        );
    }

    #[test]
    fn test_guard_required_then_rejected() {
        let body = json!({"humble_guard_required": true, "goto": "/"});
        assert_eq!(
            parse_login_reply(true, &body, &form()),
            LoginReply::SecondFactorRequired {
                factor: HumbleFactor::Guard,
                code_rejected: false
            }
        );

        let with_guard = LoginForm {
            guard: Some("abc123"),
            ..form()
        };
        assert_eq!(
            parse_login_reply(true, &body, &with_guard),
            LoginReply::SecondFactorRequired {
                factor: HumbleFactor::Guard,
                code_rejected: true
            }
        );
    }

    #[test]
    fn test_totp_required() {
        let body = json!({"two_factor_required": true, "errors": {"authy-input": ["Enter code"]}});
        assert_eq!(
            parse_login_reply(false, &body, &form()),
            LoginReply::SecondFactorRequired {
                factor: HumbleFactor::Totp,
                code_rejected: false
            }
        );
    }

    #[test]
    fn test_terms_and_success() {
        let body = json!({"user_terms_opt_in_data": {"needs_to_opt_in": true}});
        assert_eq!(
            parse_login_reply(true, &body, &form()),
            LoginReply::TermsOptInRequired
        );

        let body = json!({"success": true, "goto": "/"});
        assert_eq!(parse_login_reply(true, &body, &form()), LoginReply::Success);
    }

    #[test]
    fn test_guard_is_uppercased() {
        let form = LoginForm {
            guard: Some("ab12c"),
            ..form()
        };
        let params = form.to_params();
        assert!(params.contains(&("guard", "AB12C".to_string())));
    }
}

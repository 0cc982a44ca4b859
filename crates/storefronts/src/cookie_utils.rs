//! Cookie header helpers.
//!
//! Sessions are persisted as a single cookie header string, so every request
//! attaches it verbatim and every response's `Set-Cookie` headers are folded
//! back into it.

use std::collections::HashMap;

/// Extract a specific cookie value from a cookie string.
///
/// # Example
/// ```
/// use storefronts::cookie_utils::extract_cookie_value;
///
/// let cookies = "sessionid=abc123; steamLoginSecure=xyz789";
/// assert_eq!(extract_cookie_value(cookies, "sessionid"), Some("abc123".to_string()));
/// ```
pub fn extract_cookie_value(cookies: &str, name: &str) -> Option<String> {
    for cookie in cookies.split(';') {
        let parts: Vec<&str> = cookie.trim().splitn(2, '=').collect();
        if parts.len() == 2 && parts[0] == name {
            return Some(parts[1].to_string());
        }
    }
    None
}

/// Parse cookies from Set-Cookie response headers.
///
/// Deleted cookies (empty value) are kept so that merging clears them.
pub fn parse_set_cookies(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();

    for value in headers.get_all(reqwest::header::SET_COOKIE) {
        if let Ok(cookie_str) = value.to_str() {
            if let Some(kv) = cookie_str.split(';').next() {
                let parts: Vec<&str> = kv.trim().splitn(2, '=').collect();
                if parts.len() == 2 {
                    cookies.insert(parts[0].to_string(), parts[1].to_string());
                }
            }
        }
    }

    cookies
}

/// Rebuild a cookie string with updated values.
///
/// Original ordering is preserved, new cookies are appended in name order,
/// and cookies updated to an empty value are dropped.
pub fn rebuild_cookies(original: &str, updates: &HashMap<String, String>) -> String {
    let mut result: Vec<(String, String)> = Vec::new();

    for cookie in original.split(';') {
        let parts: Vec<&str> = cookie.trim().splitn(2, '=').collect();
        if parts.len() == 2 && !parts[0].is_empty() {
            let name = parts[0].to_string();
            let value = updates
                .get(&name)
                .cloned()
                .unwrap_or_else(|| parts[1].to_string());
            result.push((name, value));
        }
    }

    let mut added: Vec<(&String, &String)> = updates
        .iter()
        .filter(|(name, _)| !result.iter().any(|(existing, _)| existing == *name))
        .collect();
    added.sort();
    for (name, value) in added {
        result.push((name.clone(), value.clone()));
    }

    result
        .into_iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Fold the `Set-Cookie` headers of a response into `cookies`.
pub fn merge_response_cookies(cookies: &str, headers: &reqwest::header::HeaderMap) -> String {
    let updates = parse_set_cookies(headers);
    if updates.is_empty() {
        return cookies.to_string();
    }
    rebuild_cookies(cookies, &updates)
}

use reqwest::Client;
use reqwest::redirect::Policy;
use rustls::{ClientConfig, crypto::aws_lc_rs};
use rustls_platform_verifier::BuilderVerifierExt;
use std::sync::Arc;
use std::time::Duration;

use crate::error::StorefrontError;

pub const DEFAULT_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";

/// Build the HTTP client shared by both storefronts.
///
/// Redirects are never followed: a redirect to a login page is how both
/// providers signal a dead session, and callers inspect it themselves.
pub fn default_client() -> Result<Client, StorefrontError> {
    let provider = Arc::new(aws_lc_rs::default_provider());
    let tls_config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| StorefrontError::Tls(e.to_string()))?
        .with_platform_verifier()
        .map_err(|e| StorefrontError::Tls(e.to_string()))?
        .with_no_client_auth();

    let client = Client::builder()
        .use_preconfigured_tls(tls_config)
        .redirect(Policy::none())
        .user_agent(DEFAULT_UA)
        .timeout(Duration::from_secs(30))
        .build()?;
    Ok(client)
}

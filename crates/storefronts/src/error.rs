use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorefrontError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("api error (code={code}): {message}")]
    Api { code: i64, message: String },
    #[error("unexpected http status: {0}")]
    Status(reqwest::StatusCode),
    #[error("session rejected by provider")]
    Unauthorized,
    #[error("tls setup failed: {0}")]
    Tls(String),
}

impl StorefrontError {
    pub(crate) fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Whether the provider refused the credentials attached to the request.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }
}

/// Map a status code onto the error taxonomy.
///
/// Redirects count as rejections: both storefronts bounce anonymous requests
/// to their login pages.
pub(crate) fn check_status(status: reqwest::StatusCode) -> Result<(), StorefrontError> {
    if status.is_success() {
        return Ok(());
    }
    if status.is_redirection()
        || status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        return Err(StorefrontError::Unauthorized);
    }
    Err(StorefrontError::Status(status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_check_status() {
        assert!(check_status(StatusCode::OK).is_ok());
        assert!(check_status(StatusCode::FOUND).unwrap_err().is_unauthorized());
        assert!(check_status(StatusCode::FORBIDDEN).unwrap_err().is_unauthorized());
        assert!(matches!(
            check_status(StatusCode::BAD_GATEWAY),
            Err(StorefrontError::Status(StatusCode::BAD_GATEWAY))
        ));
    }
}

//! Auth capability boundary for the sync transport.

use crate::error::{Error, Result};
use crate::util::normalize_text_option;

/// "Obtain a valid bearer credential or fail."
///
/// The engine asks once per cycle; failure surfaces as an authentication
/// error and never consumes a backoff step. Token acquisition and refresh
/// live behind this trait, outside the engine.
pub trait AccessTokenProvider {
    fn access_token(&self) -> impl std::future::Future<Output = Result<String>> + Send;
}

/// Provider backed by a fixed token from config or environment.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticTokenProvider {
    token: Option<String>,
}

impl StaticTokenProvider {
    #[must_use]
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: normalize_text_option(token),
        }
    }

    /// True when a credential is configured at all.
    #[must_use]
    pub const fn is_configured(&self) -> bool {
        self.token.is_some()
    }
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("StaticTokenProvider")
            .field("token", &self.token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        self.token.clone().ok_or_else(|| {
            Error::Authentication("No access token configured; run `chartbook config init` or set CHARTBOOK_TOKEN".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_token_is_an_authentication_error() {
        let provider = StaticTokenProvider::new(Some("   ".to_string()));
        assert!(!provider.is_configured());

        let err = provider.access_token().await.unwrap_err();
        assert!(err.is_authentication());
    }

    #[test]
    fn debug_redacts_the_token() {
        let provider = StaticTokenProvider::new(Some("secret".to_string()));
        let debug = format!("{provider:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}

//! Storage credentials
//!
//! The writer never authenticates by itself. A `CredentialProvider` is handed
//! to the storage backend that needs one; refreshing tokens is the provider's
//! business.

use std::fmt;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::time::{SystemTime, UNIX_EPOCH};

/// A bearer token with an optional expiry
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    /// Unix epoch milliseconds; `None` never expires
    pub expires_at_ms: Option<u64>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at_ms: Option<u64>) -> Self {
        AccessToken {
            token: token.into(),
            expires_at_ms,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms.map_or(false, |expiry| now_ms >= expiry)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at_ms", &self.expires_at_ms)
            .finish()
    }
}

/// Source of access tokens for a storage backend
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// A token valid at the time of the call
    fn token(&self) -> IoResult<AccessToken>;
}

/// Always returns the same token
#[derive(Debug, Clone)]
pub struct StaticCredentialProvider {
    token: AccessToken,
}

impl StaticCredentialProvider {
    pub fn new(token: AccessToken) -> Self {
        StaticCredentialProvider { token }
    }
}

impl CredentialProvider for StaticCredentialProvider {
    fn token(&self) -> IoResult<AccessToken> {
        if self.token.is_expired(now_millis()) {
            return Err(IoError::new(
                ErrorKind::PermissionDenied,
                "static access token has expired",
            ));
        }
        Ok(self.token.clone())
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Adapter exposing a `CredentialProvider` to `object_store`'s GCS client
#[cfg(feature = "cloud")]
#[derive(Debug)]
pub struct GcpCredentialBridge {
    provider: std::sync::Arc<dyn CredentialProvider>,
}

#[cfg(feature = "cloud")]
impl GcpCredentialBridge {
    pub fn new(provider: std::sync::Arc<dyn CredentialProvider>) -> Self {
        GcpCredentialBridge { provider }
    }
}

#[cfg(feature = "cloud")]
#[async_trait::async_trait]
impl object_store::CredentialProvider for GcpCredentialBridge {
    type Credential = object_store::gcp::GcpCredential;

    async fn get_credential(&self) -> object_store::Result<std::sync::Arc<Self::Credential>> {
        let token = self
            .provider
            .token()
            .map_err(|e| object_store::Error::Generic {
                store: "GCS",
                source: Box::new(e),
            })?;
        Ok(std::sync::Arc::new(object_store::gcp::GcpCredential {
            bearer: token.token,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry() {
        let token = AccessToken::new("t", Some(1_000));
        assert!(!token.is_expired(999));
        assert!(token.is_expired(1_000));
        assert!(!AccessToken::new("t", None).is_expired(u64::MAX));
    }

    #[test]
    fn test_static_provider() {
        let provider = StaticCredentialProvider::new(AccessToken::new("secret", None));
        assert_eq!(provider.token().unwrap().token, "secret");

        let expired = StaticCredentialProvider::new(AccessToken::new("old", Some(1)));
        assert_eq!(
            expired.token().unwrap_err().kind(),
            ErrorKind::PermissionDenied
        );
    }

    #[test]
    fn test_debug_redacts_token() {
        let rendered = format!("{:?}", AccessToken::new("secret", None));
        assert!(!rendered.contains("secret"));
    }
}

//! Per-platform verification key material.
//!
//! Each platform registration names where its RS256 verification keys
//! come from: a JWK set URL (fetched and cached), an inline JWK set, or
//! a static RSA public key in PEM form. The `KeyStore` resolves a
//! decoding key for a given platform and token kid.

pub mod jwks;

pub use jwks::{DEFAULT_CACHE_TTL_SECONDS, Jwk, JwksCache, JwksDocument, JwksError};

use std::collections::HashMap;
use std::sync::Arc;

use jsonwebtoken::DecodingKey;
use tokio::sync::RwLock;

use crate::db::schema::{AuthConfig, AuthMethod};

/// Errors that can occur while resolving a platform verification key.
#[derive(Debug, Clone)]
pub enum TrustError {
    /// Fetching or parsing a JWK set failed.
    Jwks(JwksError),
    /// A static key could not be parsed.
    InvalidKey(String),
}

impl std::fmt::Display for TrustError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Jwks(e) => write!(f, "{}", e),
            Self::InvalidKey(msg) => write!(f, "Invalid platform key: {}", msg),
        }
    }
}

impl std::error::Error for TrustError {}

impl From<JwksError> for TrustError {
    fn from(e: JwksError) -> Self {
        Self::Jwks(e)
    }
}

/// Resolves verification keys for all registered platforms.
///
/// JWK set URLs get one `JwksCache` each, created lazily on first use
/// and shared by every request for that platform afterwards. Inline and
/// static keys are parsed per call; they are small and never fetched.
pub struct KeyStore {
    ttl_seconds: u64,
    caches: RwLock<HashMap<String, Arc<JwksCache>>>,
}

impl KeyStore {
    pub fn new(ttl_seconds: u64) -> Self {
        Self {
            ttl_seconds,
            caches: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve the decoding key for a platform's auth configuration and
    /// an optional token header kid.
    pub async fn decoding_key(
        &self,
        auth: &AuthConfig,
        kid: Option<&str>,
    ) -> Result<DecodingKey, TrustError> {
        match auth.method {
            AuthMethod::JwkSet => {
                let cache = self.cache_for(&auth.key).await;
                Ok(cache.get_key(kid).await?)
            }
            AuthMethod::JwkKey => {
                let doc = jwks::parse_document(&auth.key)?;
                Ok(jwks::select_key(&doc, kid)?)
            }
            AuthMethod::RsaKey => DecodingKey::from_rsa_pem(auth.key.as_bytes())
                .map_err(|e| TrustError::InvalidKey(e.to_string())),
        }
    }

    async fn cache_for(&self, url: &str) -> Arc<JwksCache> {
        {
            let caches = self.caches.read().await;
            if let Some(cache) = caches.get(url) {
                return cache.clone();
            }
        }

        let mut caches = self.caches.write().await;
        // A writer may have raced us here; keep whichever landed first
        caches
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(JwksCache::new(url.to_string(), self.ttl_seconds)))
            .clone()
    }
}

impl Default for KeyStore {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_TTL_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_keys::TEST_PUBLIC_KEY;

    #[tokio::test]
    async fn test_static_rsa_key_parses() {
        let store = KeyStore::default();
        let auth = AuthConfig {
            method: AuthMethod::RsaKey,
            key: TEST_PUBLIC_KEY.to_string(),
        };

        let key = store.decoding_key(&auth, None).await;
        assert!(key.is_ok());
    }

    #[tokio::test]
    async fn test_static_rsa_key_garbage_rejected() {
        let store = KeyStore::default();
        let auth = AuthConfig {
            method: AuthMethod::RsaKey,
            key: "not a pem".to_string(),
        };

        let err = store.decoding_key(&auth, None).await.unwrap_err();
        assert!(matches!(err, TrustError::InvalidKey(_)));
    }

    #[tokio::test]
    async fn test_inline_jwk_set() {
        let store = KeyStore::default();
        let auth = AuthConfig {
            method: AuthMethod::JwkKey,
            key: r#"{"keys": [{"kty": "RSA", "kid": "k1", "n": "0vx7agoebGcQSuuPiLJXZptN9nndrQmbXEps2aiAFbWhM78LhWx4cbbfAAtVT86zwu1RK7aPFFxuhDR1L6tSoc_BJECPebWKRXjBZCiFV4n3oknjhMstn64tZ_2W-5JsGY4Hc5n9yBXArwl93lqt7_RN5w6Cf0h4QyQ5v-65YGjQR0_FDW2QvzqY368QQMicAtaSqzs8KJZgnYb9c7d0zgdAZHzu6qMQvRL5hajrn1n91CbOpbISD08qNLyrdkt-bFTWhAI4vMQFh6WeZu0fM4lFd2NcRwr3XPksINHaQ-G_xBniIqbw0Ls1jF44-csFCur-kEgU8awapJzKnqDKgw", "e": "AQAB"}]}"#
                .to_string(),
        };

        let key = store.decoding_key(&auth, Some("k1")).await;
        assert!(key.is_ok());
    }

    #[tokio::test]
    async fn test_jwk_set_caches_are_shared_per_url() {
        let store = KeyStore::new(600);
        let a = store.cache_for("https://lms.example.edu/jwks").await;
        let b = store.cache_for("https://lms.example.edu/jwks").await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! Platforms rotate their signing keys, so keys are fetched from the
//! platform's JWK set URL and cached per kid. Expired cache entries are
//! refetched, never served.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::Engine;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Default cache TTL in seconds (10 minutes).
pub const DEFAULT_CACHE_TTL_SECONDS: u64 = 600;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID (optional, used to match the id token header kid)
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use (e.g., "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
    /// X.509 certificate chain
    pub x5c: Option<Vec<String>>,
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Parse a JWKS document, accepting either a full key set or a single
/// bare JWK object (platforms configured with an inline key send both).
pub fn parse_document(raw: &str) -> Result<JwksDocument, JwksError> {
    if let Ok(doc) = serde_json::from_str::<JwksDocument>(raw) {
        return Ok(doc);
    }
    let single: Jwk =
        serde_json::from_str(raw).map_err(|e| JwksError::Parse(e.to_string()))?;
    Ok(JwksDocument { keys: vec![single] })
}

/// Convert the usable signature keys of a document into decoding keys,
/// indexed by kid. Keys that fail to parse are skipped with a warning.
pub fn decoding_keys(doc: &JwksDocument) -> HashMap<String, DecodingKey> {
    let mut keys = HashMap::new();

    for jwk in &doc.keys {
        // Only RSA signature keys are usable for RS256 verification
        if jwk.kty != "RSA" {
            debug!("Skipping non-RSA key: {:?}", jwk.kty);
            continue;
        }
        if jwk.key_use.as_deref() == Some("enc") {
            debug!("Skipping encryption key");
            continue;
        }

        match jwk_to_decoding_key(jwk) {
            Ok(decoding_key) => {
                let kid = jwk.kid.clone().unwrap_or_else(|| "default".to_string());
                keys.insert(kid, decoding_key);
            }
            Err(e) => {
                warn!("Failed to parse JWK: {}", e);
            }
        }
    }

    keys
}

/// Pick a decoding key out of a document by kid.
///
/// A set holding exactly one key matches any kid, since platforms with a
/// single inline key often omit the kid on one side or the other.
pub fn select_key(doc: &JwksDocument, kid: Option<&str>) -> Result<DecodingKey, JwksError> {
    let keys = decoding_keys(doc);
    if keys.is_empty() {
        return Err(JwksError::NoValidKeys);
    }

    match kid {
        Some(k) => {
            if let Some(key) = keys.get(k) {
                return Ok(key.clone());
            }
            if keys.len() == 1 {
                if let Some(key) = keys.values().next() {
                    return Ok(key.clone());
                }
            }
            Err(JwksError::KeyNotFound(k.to_string()))
        }
        None => keys
            .into_values()
            .next()
            .ok_or(JwksError::NoKeysAvailable),
    }
}

/// Convert a JWK to a jsonwebtoken DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, JwksError> {
    // Prefer n/e components (the common case in platform key sets)
    if let (Some(n), Some(e)) = (&jwk.n, &jwk.e) {
        return DecodingKey::from_rsa_components(n, e)
            .map_err(|e| JwksError::Parse(format!("Invalid RSA components: {}", e)));
    }

    // Fall back to the first x5c certificate
    if let Some(cert) = jwk.x5c.as_ref().and_then(|c| c.first()) {
        // x5c entries are standard base64, not base64url
        let cert_der = base64::engine::general_purpose::STANDARD
            .decode(cert)
            .map_err(|e| JwksError::Parse(format!("Invalid x5c: {}", e)))?;
        return Ok(DecodingKey::from_rsa_der(&cert_der));
    }

    Err(JwksError::Parse(
        "RSA key has neither n/e components nor x5c".to_string(),
    ))
}

/// Thread-safe JWKS cache with TTL-bounded refresh.
pub struct JwksCache {
    /// The JWKS endpoint URL.
    jwks_url: String,
    /// Cache TTL.
    cache_ttl: Duration,
    /// Cached keys by kid.
    keys: Arc<RwLock<HashMap<String, DecodingKey>>>,
    /// Last successful fetch time.
    last_fetch: Arc<RwLock<Option<Instant>>>,
    /// HTTP client for fetching JWKS.
    client: reqwest::Client,
}

impl JwksCache {
    /// Create a new JWKS cache for one endpoint.
    pub fn new(jwks_url: String, cache_ttl_seconds: u64) -> Self {
        Self {
            jwks_url,
            cache_ttl: Duration::from_secs(cache_ttl_seconds),
            keys: Arc::new(RwLock::new(HashMap::new())),
            last_fetch: Arc::new(RwLock::new(None)),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Get a decoding key by key ID.
    ///
    /// If `kid` is None, returns the first available key. Fetches from
    /// the JWKS endpoint when the cache is past its TTL or the key is
    /// absent; a failed fetch fails the lookup rather than serving
    /// whatever was cached before.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<DecodingKey, JwksError> {
        let should_refresh = {
            let last_fetch = self.last_fetch.read().await;
            match *last_fetch {
                Some(t) => t.elapsed() > self.cache_ttl,
                None => true,
            }
        };

        if !should_refresh {
            if let Some(key) = self.get_from_cache(kid).await {
                return Ok(key);
            }
        }

        self.fetch_keys().await?;

        self.get_from_cache(kid).await.ok_or_else(|| {
            if let Some(k) = kid {
                JwksError::KeyNotFound(k.to_string())
            } else {
                JwksError::NoKeysAvailable
            }
        })
    }

    /// Get a key from the cache without fetching.
    async fn get_from_cache(&self, kid: Option<&str>) -> Option<DecodingKey> {
        let keys = self.keys.read().await;

        match kid {
            Some(k) => keys.get(k).cloned(),
            None => keys.values().next().cloned(),
        }
    }

    /// Fetch keys from the JWKS endpoint and replace the cache.
    pub async fn fetch_keys(&self) -> Result<(), JwksError> {
        debug!("Fetching JWKS from {}", self.jwks_url);

        let response = self
            .client
            .get(&self.jwks_url)
            .send()
            .await
            .map_err(|e| JwksError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(JwksError::Fetch(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwksDocument = response
            .json()
            .await
            .map_err(|e| JwksError::Parse(e.to_string()))?;

        let new_keys = decoding_keys(&jwks);
        if new_keys.is_empty() {
            return Err(JwksError::NoValidKeys);
        }

        let count = new_keys.len();
        {
            let mut keys = self.keys.write().await;
            *keys = new_keys;
        }
        {
            let mut last_fetch = self.last_fetch.write().await;
            *last_fetch = Some(Instant::now());
        }

        debug!("Successfully cached {} keys from {}", count, self.jwks_url);
        Ok(())
    }

    /// Check if the cache has any keys.
    pub async fn has_keys(&self) -> bool {
        !self.keys.read().await.is_empty()
    }

    /// Get the number of cached keys.
    pub async fn key_count(&self) -> usize {
        self.keys.read().await.len()
    }
}

/// Errors that can occur when working with platform key sets.
#[derive(Debug, Clone)]
pub enum JwksError {
    /// Failed to fetch JWKS from endpoint.
    Fetch(String),
    /// Failed to parse a JWKS document or key.
    Parse(String),
    /// No usable keys found in the document.
    NoValidKeys,
    /// Key with the specified kid not found.
    KeyNotFound(String),
    /// No keys available at all.
    NoKeysAvailable,
}

impl std::fmt::Display for JwksError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fetch(msg) => write!(f, "Failed to fetch JWKS: {}", msg),
            Self::Parse(msg) => write!(f, "Failed to parse JWKS: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
            Self::NoKeysAvailable => write!(f, "No keys available"),
        }
    }
}

impl std::error::Error for JwksError {}

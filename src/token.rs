//! Id token validation.
//!
//! Verifies the RS256 signature against the platform's key material,
//! checks issuer, audience and expiry, and consumes the nonce so a
//! second token carrying the same value is rejected.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, Validation, decode, decode_header, errors::ErrorKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::sql::Datetime;
use tracing::debug;

use crate::db::schema::PlatformRecord;
use crate::db::{Db, QueryBuilder};
use crate::error::{LtiError, LtiResult};
use crate::trust::{JwksError, KeyStore, TrustError};
use crate::types::Nonce;

/// Clock skew tolerated on `exp` and `iat`, in seconds.
pub const DEFAULT_LEEWAY_SECONDS: u64 = 60;

/// How long a consumed nonce is remembered. Matches the launch state
/// lifetime; a token minted for an expired state can never validate, so
/// older nonces cannot come back.
pub const NONCE_LIFETIME_SECONDS: i64 = 600;

/// The `aud` claim, which platforms send as a string or an array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::One(aud) => aud == client_id,
            Self::Many(auds) => auds.iter().any(|a| a == client_id),
        }
    }
}

impl std::fmt::Display for Audience {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::One(aud) => write!(f, "{}", aud),
            Self::Many(auds) => write!(f, "{}", auds.join(", ")),
        }
    }
}

/// The decoded claim set of a validated id token.
///
/// Registered claims are typed; everything else (the LTI claim URIs
/// among them) stays in `rest` exactly as the platform sent it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchClaims {
    pub iss: String,
    pub sub: String,
    pub aud: Audience,
    pub exp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub nonce: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub azp: Option<String>,
    #[serde(flatten)]
    pub rest: serde_json::Map<String, Value>,
}

impl LaunchClaims {
    /// Look up a claim outside the registered set by its full URI.
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.rest.get(name)
    }
}

/// Validates id tokens against a platform registration.
pub struct TokenValidator {
    db: Db,
    key_store: Arc<KeyStore>,
    leeway: u64,
}

impl TokenValidator {
    pub fn new(db: Db, key_store: Arc<KeyStore>) -> Self {
        Self {
            db,
            key_store,
            leeway: DEFAULT_LEEWAY_SECONDS,
        }
    }

    /// Validate an id token for the given platform.
    ///
    /// `expected_nonce` is the nonce minted at login initiation; the
    /// token must carry it, and it must never have been consumed before.
    /// On success the decoded claim set is returned unmodified.
    pub async fn validate(
        &self,
        id_token: &str,
        platform: &PlatformRecord,
        expected_nonce: &Nonce,
    ) -> LtiResult<LaunchClaims> {
        let header = decode_header(id_token)
            .map_err(|e| LtiError::SignatureInvalid(format!("Invalid token header: {}", e)))?;

        let decoding_key = self
            .key_store
            .decoding_key(&platform.auth_config, header.kid.as_deref())
            .await
            .map_err(|e| match e {
                TrustError::Jwks(JwksError::Fetch(msg)) => LtiError::Internal(msg),
                other => LtiError::SignatureInvalid(other.to_string()),
            })?;

        // Issuer and audience are compared by hand below so mismatches
        // can report both sides; the library checks signature and expiry.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.leeway;
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp"]);

        let token_data =
            decode::<LaunchClaims>(id_token, &decoding_key, &validation).map_err(|e| {
                match e.kind() {
                    ErrorKind::ExpiredSignature => LtiError::Expired,
                    _ => LtiError::SignatureInvalid(e.to_string()),
                }
            })?;
        let claims = token_data.claims;

        if claims.iss != platform.issuer.as_str() {
            return Err(LtiError::IssuerMismatch {
                expected: platform.issuer.to_string(),
                found: claims.iss,
            });
        }

        if !claims.aud.contains(platform.client_id.as_str()) {
            return Err(LtiError::AudienceMismatch {
                expected: platform.client_id.to_string(),
                found: claims.aud.to_string(),
            });
        }

        if claims.nonce != expected_nonce.as_str() {
            return Err(LtiError::SignatureInvalid(
                "Token nonce does not match the login initiation".to_string(),
            ));
        }

        let nonce = Nonce::new(claims.nonce.clone());
        let expires_at =
            Datetime::from(Utc::now() + ChronoDuration::seconds(NONCE_LIFETIME_SECONDS));
        let consumed =
            QueryBuilder::consume_nonce(&self.db, &platform.issuer, &nonce, expires_at)
                .await
                .map_err(|e| LtiError::Database(e.to_string()))?;
        if !consumed {
            return Err(LtiError::NonceReplayed(nonce.into_inner()));
        }

        debug!(
            issuer = %platform.issuer,
            sub = %claims.sub,
            "Id token validated"
        );

        Ok(claims)
    }
}

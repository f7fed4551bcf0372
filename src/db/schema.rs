use serde::{Deserialize, Serialize};
use surrealdb::{RecordId, sql::Datetime};

use crate::types::{ClientId, DeploymentId, Issuer, Nonce, StateToken};

/// How the tool obtains the verification key for a platform's id tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthMethod {
    /// `key` is a JWK set URL; keys are fetched and cached.
    #[serde(rename = "JWK_SET")]
    JwkSet,
    /// `key` is an inline JWK set document.
    #[serde(rename = "JWK_KEY")]
    JwkKey,
    /// `key` is a static RSA public key in PEM form.
    #[serde(rename = "RSA_KEY")]
    RsaKey,
}

/// Verification key configuration stored on each platform record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    pub method: AuthMethod,
    pub key: String,
}

/// Persisted representation of a platform registration in SurrealDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformRecord {
    /// Stable database identifier (table: `platform`), derived from the
    /// issuer and client id so re-registration targets the same record.
    pub id: RecordId,
    /// Platform issuer URL (`iss` claim).
    pub issuer: Issuer,
    /// Client id assigned to this tool by the platform (`aud` claim).
    pub client_id: ClientId,
    /// Human-friendly platform name.
    pub name: String,
    /// OIDC authorization endpoint used for the auth request redirect.
    pub authentication_endpoint: String,
    /// OAuth2 token endpoint (kept for service calls made by deployments).
    pub accesstoken_endpoint: String,
    /// Where the platform's verification keys come from.
    pub auth_config: AuthConfig,
    /// Deployment ids the platform has announced for this registration.
    pub deployment_ids: Vec<DeploymentId>,
    /// Inactive platforms are rejected at login initiation.
    pub is_active: bool,
    /// When this record was first created.
    pub created_at: Option<Datetime>,
    /// When this record was last updated.
    pub updated_at: Option<Datetime>,
}

/// Payload used when inserting or replacing a platform registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformCreate {
    pub issuer: Issuer,
    pub client_id: ClientId,
    pub name: String,
    pub authentication_endpoint: String,
    pub accesstoken_endpoint: String,
    pub auth_config: AuthConfig,
    pub deployment_ids: Vec<DeploymentId>,
    pub is_active: bool,
}

/// Persisted login initiation awaiting its authentication response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchStateRecord {
    pub id: RecordId,
    /// Single-use token echoed back by the platform in the form POST.
    pub state: StateToken,
    /// Expected `nonce` claim of the id token this state will redeem.
    pub nonce: Nonce,
    pub issuer: Issuer,
    pub client_id: ClientId,
    /// `target_link_uri` from the login initiation, if any.
    pub target_link_uri: Option<String>,
    /// `lti_message_hint` from the login initiation, echoed to the platform.
    pub message_hint: Option<String>,
    /// `lti_deployment_id` hint from the login initiation, if any.
    pub deployment_hint: Option<String>,
    pub expires_at: Datetime,
}

/// Payload used when persisting a fresh login initiation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchStateCreate {
    pub state: StateToken,
    pub nonce: Nonce,
    pub issuer: Issuer,
    pub client_id: ClientId,
    pub target_link_uri: Option<String>,
    pub message_hint: Option<String>,
    pub deployment_hint: Option<String>,
    pub expires_at: Datetime,
}

/// A consumed nonce. Presence of the row is what blocks replays.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NonceRecord {
    pub id: RecordId,
    pub issuer: Issuer,
    pub value: Nonce,
    pub expires_at: Datetime,
}

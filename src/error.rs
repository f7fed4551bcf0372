//! Error types for launch, validation and registration operations.
//!
//! Every protocol failure maps to one HTTP status so the dispatch layer
//! can render the original error envelope:
//! `{"status": <code>, "error": <reason>, "details": {"message": ...}}`.

use http::StatusCode;
use std::fmt;

/// Errors that can occur while validating tokens, completing launches or
/// registering platforms.
#[derive(Debug, Clone)]
pub enum LtiError {
    /// The id token signature did not verify against the platform key.
    SignatureInvalid(String),

    /// The `iss` claim does not match the platform that sent the login.
    IssuerMismatch {
        expected: String,
        found: String,
    },

    /// The `aud` claim does not contain this tool's client id.
    AudienceMismatch {
        expected: String,
        found: String,
    },

    /// The token expired beyond the allowed clock leeway.
    Expired,

    /// The `nonce` claim was already consumed by a previous launch.
    NonceReplayed(String),

    /// No active platform registration matches the request.
    PlatformNotFound(String),

    /// The state token is unknown, expired, or already redeemed.
    StateNotFound,

    /// The deployment id claim is not registered on the platform.
    DeploymentMismatch(String),

    /// A required request parameter is absent.
    MissingParameter(String),

    /// A registration for this (issuer, client id) pair already exists.
    AlreadyRegistered {
        issuer: String,
        client_id: String,
    },

    /// The dynamic registration exchange with the platform failed.
    RegistrationFailed(String),

    /// Database error occurred.
    Database(String),

    /// Internal error occurred.
    Internal(String),
}

impl fmt::Display for LtiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignatureInvalid(msg) => write!(f, "Invalid token signature: {}", msg),
            Self::IssuerMismatch { expected, found } => {
                write!(f, "Issuer mismatch: expected {}, got {}", expected, found)
            }
            Self::AudienceMismatch { expected, found } => {
                write!(f, "Audience mismatch: expected {}, got {}", expected, found)
            }
            Self::Expired => write!(f, "Token expired"),
            Self::NonceReplayed(nonce) => write!(f, "Nonce already used: {}", nonce),
            Self::PlatformNotFound(issuer) => {
                write!(f, "Unregistered or inactive platform: {}", issuer)
            }
            Self::StateNotFound => write!(f, "Unknown or expired state token"),
            Self::DeploymentMismatch(deployment_id) => {
                write!(f, "Deployment not registered: {}", deployment_id)
            }
            Self::MissingParameter(name) => write!(f, "Missing parameter: \"{}\".", name),
            Self::AlreadyRegistered { issuer, client_id } => {
                write!(
                    f,
                    "Platform already registered: {} ({})",
                    issuer, client_id
                )
            }
            Self::RegistrationFailed(msg) => write!(f, "Dynamic registration failed: {}", msg),
            Self::Database(msg) => write!(f, "Database error: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for LtiError {}

/// Result type for tool provider operations.
pub type LtiResult<T> = Result<T, LtiError>;

impl From<anyhow::Error> for LtiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<surrealdb::Error> for LtiError {
    fn from(err: surrealdb::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl LtiError {
    /// HTTP status this error surfaces as at the dispatch layer.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingParameter(_) => StatusCode::BAD_REQUEST,
            Self::SignatureInvalid(_)
            | Self::IssuerMismatch { .. }
            | Self::AudienceMismatch { .. }
            | Self::Expired
            | Self::NonceReplayed(_)
            | Self::DeploymentMismatch(_) => StatusCode::UNAUTHORIZED,
            Self::AlreadyRegistered { .. } => StatusCode::FORBIDDEN,
            Self::PlatformNotFound(_) | Self::StateNotFound => StatusCode::NOT_FOUND,
            Self::RegistrationFailed(_) | Self::Database(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// The reason phrase used in the error envelope's `error` field.
    pub fn reason(&self) -> &'static str {
        self.status().canonical_reason().unwrap_or("Error")
    }
}

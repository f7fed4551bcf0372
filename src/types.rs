//! NewType wrappers for strong typing throughout the tool provider.
//!
//! These types prevent accidental mixing of semantically different strings
//! (e.g., passing a client id where an issuer is expected).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Macro to generate a NewType wrapper with standard trait implementations.
macro_rules! newtype_string {
    (
        $(#[$meta:meta])*
        $name:ident
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create a new instance.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Get the inner value as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume and return the inner String.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::borrow::Borrow<str> for $name {
            fn borrow(&self) -> &str {
                &self.0
            }
        }
    };
}

newtype_string!(
    /// Platform issuer URL (the `iss` claim of every id token it signs).
    ///
    /// Issuers identify the learning platform, e.g.
    /// "https://canvas.instructure.com". A single issuer may host multiple
    /// registrations distinguished by `ClientId`.
    Issuer
);

newtype_string!(
    /// OAuth2 client identifier assigned to this tool by a platform.
    ///
    /// Together with the `Issuer` it uniquely identifies a platform
    /// registration. It also appears as the `aud` claim of id tokens.
    ClientId
);

newtype_string!(
    /// Deployment identifier within a platform registration.
    ///
    /// Platforms may deploy the same tool registration into several
    /// contexts (courses, accounts); each deployment carries its own id
    /// in the launch claims.
    DeploymentId
);

newtype_string!(
    /// Opaque single-use token binding a login initiation to its
    /// authentication response.
    ///
    /// Minted at initiation, echoed back by the platform in the form
    /// POST, and redeemed exactly once at completion.
    StateToken
);

newtype_string!(
    /// Single-use replay guard embedded in the id token's `nonce` claim.
    ///
    /// Minted together with the state token and consumed when the id
    /// token is validated. A second token carrying the same value is
    /// rejected.
    Nonce
);

newtype_string!(
    /// Bearer token handed out by a platform's dynamic registration UI.
    ///
    /// Sent back to the platform's registration endpoint to authorize
    /// the RFC 7591 client registration request.
    RegistrationToken
);

newtype_string!(
    /// Subject identifier of the launching user (the `sub` claim).
    ///
    /// Opaque and platform-scoped; never interpreted by the tool beyond
    /// equality.
    Subject
);

newtype_string!(
    /// Database identifier for a platform record (e.g., "platform:abc123").
    ///
    /// This is the stable ID used to reference platform registrations in
    /// the database. It is derived deterministically from the issuer and
    /// client id so re-registration targets the same record.
    PlatformId
);

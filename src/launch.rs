//! Two-phase OIDC third-party-initiated login.
//!
//! `initiate` answers a platform's login initiation with an
//! authorization redirect URL carrying a fresh state and nonce.
//! `complete` redeems the state, validates the posted id token and maps
//! its claims into a `LaunchContext`, dispatching on the LTI message
//! type. State redemption happens before validation, so a replayed
//! state loses even when the token itself would verify.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::sql::Datetime;
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

use crate::db::schema::{LaunchStateCreate, LaunchStateRecord, PlatformRecord};
use crate::db::{Db, QueryBuilder};
use crate::error::{LtiError, LtiResult};
use crate::token::{LaunchClaims, TokenValidator};
use crate::trust::KeyStore;
use crate::types::{ClientId, DeploymentId, Issuer, Nonce, StateToken, Subject};

/// How long a pending login initiation stays redeemable.
pub const STATE_LIFETIME_SECONDS: i64 = 600;

pub const CLAIM_MESSAGE_TYPE: &str =
    "https://purl.imsglobal.org/spec/lti/claim/message_type";
pub const CLAIM_DEPLOYMENT_ID: &str =
    "https://purl.imsglobal.org/spec/lti/claim/deployment_id";
pub const CLAIM_TARGET_LINK_URI: &str =
    "https://purl.imsglobal.org/spec/lti/claim/target_link_uri";
pub const CLAIM_ROLES: &str = "https://purl.imsglobal.org/spec/lti/claim/roles";
pub const CLAIM_RESOURCE_LINK: &str =
    "https://purl.imsglobal.org/spec/lti/claim/resource_link";
pub const CLAIM_CUSTOM: &str = "https://purl.imsglobal.org/spec/lti/claim/custom";
pub const CLAIM_DEEP_LINKING_SETTINGS: &str =
    "https://purl.imsglobal.org/spec/lti-dl/claim/deep_linking_settings";

pub const MESSAGE_TYPE_RESOURCE_LINK: &str = "LtiResourceLinkRequest";
pub const MESSAGE_TYPE_DEEP_LINKING: &str = "LtiDeepLinkingRequest";

/// Parameters of a platform's login initiation request.
///
/// Platforms send these as query parameters (GET) or form fields
/// (POST); presence checks happen in `initiate` so both transports
/// share one deserialization shape.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginInitiation {
    pub iss: Option<String>,
    pub login_hint: Option<String>,
    pub target_link_uri: Option<String>,
    pub client_id: Option<String>,
    pub lti_message_hint: Option<String>,
    pub lti_deployment_id: Option<String>,
}

/// Form fields of the platform's authentication response POST.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthenticationResponse {
    pub state: Option<String>,
    pub id_token: Option<String>,
}

/// The `resource_link` claim of a resource link launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLink {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// The `deep_linking_settings` claim of a deep linking launch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepLinkingSettings {
    pub deep_link_return_url: String,
    #[serde(default)]
    pub accept_types: Vec<String>,
    #[serde(default)]
    pub accept_presentation_document_targets: Vec<String>,
    #[serde(default)]
    pub accept_multiple: bool,
    #[serde(default)]
    pub auto_create: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// Everything a tool needs to serve a validated launch.
///
/// Immutable once built; the raw claim set stays available for claims
/// outside the mapped subset.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchContext {
    pub issuer: Issuer,
    pub client_id: ClientId,
    pub subject: Subject,
    pub deployment_id: DeploymentId,
    /// Role URIs in the order the platform sent them.
    pub roles: Vec<String>,
    pub resource_link: Option<ResourceLink>,
    pub custom: serde_json::Map<String, Value>,
    pub target_link_uri: Option<String>,
    pub claims: LaunchClaims,
}

impl LaunchContext {
    fn from_claims(
        platform: &PlatformRecord,
        state: &LaunchStateRecord,
        deployment_id: DeploymentId,
        claims: LaunchClaims,
    ) -> Self {
        let roles = claims
            .claim(CLAIM_ROLES)
            .and_then(Value::as_array)
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();

        let resource_link = claims
            .claim(CLAIM_RESOURCE_LINK)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok());

        let custom = claims
            .claim(CLAIM_CUSTOM)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        let target_link_uri = claims
            .claim(CLAIM_TARGET_LINK_URI)
            .and_then(Value::as_str)
            .map(String::from)
            .or_else(|| state.target_link_uri.clone());

        Self {
            issuer: platform.issuer.clone(),
            client_id: platform.client_id.clone(),
            subject: Subject::new(claims.sub.clone()),
            deployment_id,
            roles,
            resource_link,
            custom,
            target_link_uri,
            claims,
        }
    }
}

/// A completed launch, tagged by the LTI message type.
#[derive(Debug, Clone)]
pub enum LaunchOutcome {
    ResourceLink(LaunchContext),
    DeepLinking(LaunchContext, DeepLinkingSettings),
}

impl LaunchOutcome {
    pub fn context(&self) -> &LaunchContext {
        match self {
            Self::ResourceLink(ctx) => ctx,
            Self::DeepLinking(ctx, _) => ctx,
        }
    }
}

/// Drives the login initiation and launch completion phases.
pub struct LaunchEngine {
    db: Db,
    validator: TokenValidator,
    redirect_uri: String,
}

impl LaunchEngine {
    /// `redirect_uri` is the tool's launch endpoint, sent to the
    /// platform in the authorization request.
    pub fn new(db: Db, key_store: Arc<KeyStore>, redirect_uri: impl Into<String>) -> Self {
        Self {
            validator: TokenValidator::new(db.clone(), key_store),
            db,
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Answer a login initiation with the authorization redirect URL.
    ///
    /// Looks up the platform by issuer (and client id when the
    /// initiation carries one), mints a single-use state and nonce, and
    /// builds the request against the platform's authentication
    /// endpoint. Inactive or unknown platforms fail `PlatformNotFound`.
    pub async fn initiate(&self, params: LoginInitiation) -> LtiResult<Url> {
        let issuer = params
            .iss
            .map(Issuer::new)
            .ok_or_else(|| LtiError::MissingParameter("iss".to_string()))?;
        let login_hint = params
            .login_hint
            .ok_or_else(|| LtiError::MissingParameter("login_hint".to_string()))?;
        let client_id = params.client_id.map(ClientId::new);

        let platform = self.resolve_platform(&issuer, client_id.as_ref()).await?;

        // Housekeeping only; reads filter on expiry themselves
        if let Err(e) = QueryBuilder::purge_expired(&self.db).await {
            warn!(error = %e, "Purging expired launch state failed");
        }

        let state = StateToken::new(Uuid::new_v4().to_string());
        let nonce = Nonce::new(Uuid::new_v4().to_string());
        let expires_at =
            Datetime::from(Utc::now() + ChronoDuration::seconds(STATE_LIFETIME_SECONDS));
        QueryBuilder::create_launch_state(
            &self.db,
            &LaunchStateCreate {
                state: state.clone(),
                nonce: nonce.clone(),
                issuer: platform.issuer.clone(),
                client_id: platform.client_id.clone(),
                target_link_uri: params.target_link_uri,
                message_hint: params.lti_message_hint.clone(),
                deployment_hint: params.lti_deployment_id,
                expires_at,
            },
        )
        .await
        .map_err(|e| LtiError::Database(e.to_string()))?;

        let mut url = Url::parse(&platform.authentication_endpoint).map_err(|e| {
            LtiError::Internal(format!(
                "Platform authentication endpoint is not a valid URL: {}",
                e
            ))
        })?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("response_type", "id_token")
                .append_pair("response_mode", "form_post")
                .append_pair("scope", "openid")
                .append_pair("client_id", platform.client_id.as_str())
                .append_pair("redirect_uri", &self.redirect_uri)
                .append_pair("login_hint", &login_hint)
                .append_pair("state", state.as_str())
                .append_pair("nonce", nonce.as_str())
                .append_pair("prompt", "none");
            if let Some(hint) = &params.lti_message_hint {
                pairs.append_pair("lti_message_hint", hint);
            }
        }

        info!(
            issuer = %platform.issuer,
            client_id = %platform.client_id,
            "Login initiated"
        );

        Ok(url)
    }

    /// Redeem a state and validate its id token into a launch.
    ///
    /// Redemption is a single conditional delete, so a second request
    /// for the same state (replay or race loser) fails `StateNotFound`
    /// before any token work happens. Message types other than deep
    /// linking take the resource link branch.
    pub async fn complete(&self, params: AuthenticationResponse) -> LtiResult<LaunchOutcome> {
        let state = params
            .state
            .map(StateToken::new)
            .ok_or_else(|| LtiError::MissingParameter("state".to_string()))?;
        let id_token = params
            .id_token
            .ok_or_else(|| LtiError::MissingParameter("id_token".to_string()))?;

        let record = QueryBuilder::redeem_launch_state(&self.db, &state)
            .await
            .map_err(|e| LtiError::Database(e.to_string()))?
            .ok_or(LtiError::StateNotFound)?;

        let platform = self
            .resolve_platform(&record.issuer, Some(&record.client_id))
            .await?;

        let claims = self
            .validator
            .validate(&id_token, &platform, &record.nonce)
            .await?;

        let deployment_id = claims
            .claim(CLAIM_DEPLOYMENT_ID)
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| LtiError::MissingParameter(CLAIM_DEPLOYMENT_ID.to_string()))?;
        // An empty registered list means the platform never announced
        // its deployments, so any value is accepted
        if !platform.deployment_ids.is_empty()
            && !platform
                .deployment_ids
                .iter()
                .any(|d| d.as_str() == deployment_id)
        {
            return Err(LtiError::DeploymentMismatch(deployment_id));
        }
        if let Some(hint) = &record.deployment_hint {
            if hint != &deployment_id {
                return Err(LtiError::DeploymentMismatch(deployment_id));
            }
        }

        let message_type = claims
            .claim(CLAIM_MESSAGE_TYPE)
            .and_then(Value::as_str)
            .unwrap_or(MESSAGE_TYPE_RESOURCE_LINK)
            .to_string();

        let context = LaunchContext::from_claims(
            &platform,
            &record,
            DeploymentId::new(deployment_id),
            claims,
        );

        info!(
            issuer = %context.issuer,
            sub = %context.subject,
            message_type = %message_type,
            "Launch completed"
        );

        if message_type == MESSAGE_TYPE_DEEP_LINKING {
            let raw = context
                .claims
                .claim(CLAIM_DEEP_LINKING_SETTINGS)
                .cloned()
                .ok_or_else(|| {
                    LtiError::MissingParameter(CLAIM_DEEP_LINKING_SETTINGS.to_string())
                })?;
            let settings: DeepLinkingSettings = serde_json::from_value(raw).map_err(|e| {
                LtiError::SignatureInvalid(format!("Malformed deep linking settings: {}", e))
            })?;
            Ok(LaunchOutcome::DeepLinking(context, settings))
        } else {
            Ok(LaunchOutcome::ResourceLink(context))
        }
    }

    async fn resolve_platform(
        &self,
        issuer: &Issuer,
        client_id: Option<&ClientId>,
    ) -> LtiResult<PlatformRecord> {
        let found = match client_id {
            Some(cid) => QueryBuilder::find_platform(&self.db, issuer, cid)
                .await
                .map_err(|e| LtiError::Database(e.to_string()))?,
            None => QueryBuilder::find_platforms_by_issuer(&self.db, issuer)
                .await
                .map_err(|e| LtiError::Database(e.to_string()))?
                .into_iter()
                .find(|p| p.is_active),
        };

        match found {
            Some(platform) if platform.is_active => Ok(platform),
            _ => Err(LtiError::PlatformNotFound(issuer.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_connection;
    use crate::db::schema::{AuthConfig, AuthMethod, PlatformCreate};
    use crate::test_keys::{TEST_PUBLIC_KEY, sign_claims};
    use serde_json::json;

    const ISSUER: &str = "https://lms.example.edu";
    const CLIENT_ID: &str = "client-1";
    const REDIRECT_URI: &str = "https://tool.example.com/launch";

    async fn register_platform(db: &Db, deployment_ids: Vec<&str>) -> PlatformRecord {
        let data = PlatformCreate {
            issuer: Issuer::new(ISSUER),
            client_id: ClientId::new(CLIENT_ID),
            name: "Example LMS".to_string(),
            authentication_endpoint: format!("{}/auth", ISSUER),
            accesstoken_endpoint: format!("{}/token", ISSUER),
            auth_config: AuthConfig {
                method: AuthMethod::RsaKey,
                key: TEST_PUBLIC_KEY.to_string(),
            },
            deployment_ids: deployment_ids.into_iter().map(DeploymentId::new).collect(),
            is_active: true,
        };
        QueryBuilder::create_platform(db, &data)
            .await
            .unwrap()
            .unwrap()
    }

    fn engine(db: &Db) -> LaunchEngine {
        LaunchEngine::new(db.clone(), Arc::new(KeyStore::default()), REDIRECT_URI)
    }

    fn initiation() -> LoginInitiation {
        LoginInitiation {
            iss: Some(ISSUER.to_string()),
            login_hint: Some("hint-1".to_string()),
            target_link_uri: Some(REDIRECT_URI.to_string()),
            client_id: Some(CLIENT_ID.to_string()),
            lti_message_hint: None,
            lti_deployment_id: None,
        }
    }

    fn query_param(url: &Url, name: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    fn resource_link_claims(nonce: &str, deployment_id: &str) -> serde_json::Value {
        let now = Utc::now().timestamp();
        json!({
            "iss": ISSUER,
            "sub": "user-42",
            "aud": CLIENT_ID,
            "exp": now + 300,
            "iat": now,
            "nonce": nonce,
            CLAIM_MESSAGE_TYPE: MESSAGE_TYPE_RESOURCE_LINK,
            CLAIM_DEPLOYMENT_ID: deployment_id,
            CLAIM_ROLES: [
                "http://purl.imsglobal.org/vocab/lis/v2/membership#Instructor",
                "http://purl.imsglobal.org/vocab/lis/v2/membership#Learner",
            ],
            CLAIM_RESOURCE_LINK: { "id": "link-7", "title": "Week 3 quiz" },
            CLAIM_CUSTOM: { "unit": "3" },
        })
    }

    async fn initiated_launch(eng: &LaunchEngine) -> (String, String) {
        let url = eng.initiate(initiation()).await.unwrap();
        let state = query_param(&url, "state").unwrap();
        let nonce = query_param(&url, "nonce").unwrap();
        (state, nonce)
    }

    #[tokio::test]
    async fn test_initiate_builds_authorization_url() {
        let db = test_connection().await;
        register_platform(&db, vec!["1"]).await;

        let url = engine(&db)
            .initiate(LoginInitiation {
                lti_message_hint: Some("hint-77".to_string()),
                ..initiation()
            })
            .await
            .unwrap();

        assert!(url.as_str().starts_with(&format!("{}/auth?", ISSUER)));
        assert_eq!(query_param(&url, "response_type").as_deref(), Some("id_token"));
        assert_eq!(query_param(&url, "response_mode").as_deref(), Some("form_post"));
        assert_eq!(query_param(&url, "scope").as_deref(), Some("openid"));
        assert_eq!(query_param(&url, "client_id").as_deref(), Some(CLIENT_ID));
        assert_eq!(query_param(&url, "redirect_uri").as_deref(), Some(REDIRECT_URI));
        assert_eq!(query_param(&url, "login_hint").as_deref(), Some("hint-1"));
        assert_eq!(query_param(&url, "prompt").as_deref(), Some("none"));
        assert_eq!(query_param(&url, "lti_message_hint").as_deref(), Some("hint-77"));
        assert!(!query_param(&url, "state").unwrap().is_empty());
        assert!(!query_param(&url, "nonce").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_initiate_unknown_issuer_fails() {
        let db = test_connection().await;

        let err = engine(&db).initiate(initiation()).await.unwrap_err();
        assert!(matches!(err, LtiError::PlatformNotFound(_)));
    }

    #[tokio::test]
    async fn test_initiate_inactive_platform_fails() {
        let db = test_connection().await;
        let platform = register_platform(&db, vec!["1"]).await;
        QueryBuilder::set_platform_active(&db, &platform.issuer, &platform.client_id, false)
            .await
            .unwrap();

        let err = engine(&db).initiate(initiation()).await.unwrap_err();
        assert!(matches!(err, LtiError::PlatformNotFound(_)));
    }

    #[tokio::test]
    async fn test_initiate_without_login_hint_fails() {
        let db = test_connection().await;
        register_platform(&db, vec!["1"]).await;

        let err = engine(&db)
            .initiate(LoginInitiation {
                login_hint: None,
                ..initiation()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LtiError::MissingParameter(ref name) if name == "login_hint"));
    }

    #[tokio::test]
    async fn test_initiate_without_client_id_picks_active_registration() {
        let db = test_connection().await;
        register_platform(&db, vec!["1"]).await;

        let url = engine(&db)
            .initiate(LoginInitiation {
                client_id: None,
                ..initiation()
            })
            .await
            .unwrap();
        assert_eq!(query_param(&url, "client_id").as_deref(), Some(CLIENT_ID));
    }

    #[tokio::test]
    async fn test_resource_link_launch_end_to_end() {
        let db = test_connection().await;
        register_platform(&db, vec!["1"]).await;
        let eng = engine(&db);
        let (state, nonce) = initiated_launch(&eng).await;

        let token = sign_claims(&resource_link_claims(&nonce, "1"));
        let outcome = eng
            .complete(AuthenticationResponse {
                state: Some(state),
                id_token: Some(token),
            })
            .await
            .unwrap();

        let ctx = match outcome {
            LaunchOutcome::ResourceLink(ctx) => ctx,
            LaunchOutcome::DeepLinking(..) => panic!("expected resource link branch"),
        };
        assert_eq!(ctx.subject.as_str(), "user-42");
        assert_eq!(ctx.deployment_id.as_str(), "1");
        assert_eq!(ctx.resource_link.as_ref().unwrap().id, "link-7");
        assert_eq!(ctx.roles.len(), 2);
        assert!(ctx.roles[0].ends_with("#Instructor"));
        assert_eq!(
            ctx.custom.get("unit").and_then(Value::as_str),
            Some("3")
        );
        assert_eq!(ctx.target_link_uri.as_deref(), Some(REDIRECT_URI));
    }

    #[tokio::test]
    async fn test_deep_linking_launch_end_to_end() {
        let db = test_connection().await;
        register_platform(&db, vec!["1"]).await;
        let eng = engine(&db);
        let (state, nonce) = initiated_launch(&eng).await;

        let mut claims = resource_link_claims(&nonce, "1");
        claims[CLAIM_MESSAGE_TYPE] = json!(MESSAGE_TYPE_DEEP_LINKING);
        claims[CLAIM_DEEP_LINKING_SETTINGS] = json!({
            "deep_link_return_url": format!("{}/deep_links", ISSUER),
            "accept_types": ["ltiResourceLink"],
            "accept_presentation_document_targets": ["iframe", "window"],
            "auto_create": true,
        });
        let token = sign_claims(&claims);

        let outcome = eng
            .complete(AuthenticationResponse {
                state: Some(state),
                id_token: Some(token),
            })
            .await
            .unwrap();

        let (ctx, settings) = match outcome {
            LaunchOutcome::DeepLinking(ctx, settings) => (ctx, settings),
            LaunchOutcome::ResourceLink(_) => panic!("expected deep linking branch"),
        };
        assert_eq!(ctx.subject.as_str(), "user-42");
        assert_eq!(
            settings.deep_link_return_url,
            format!("{}/deep_links", ISSUER)
        );
        assert_eq!(settings.accept_types, vec!["ltiResourceLink"]);
        assert!(settings.auto_create);
    }

    #[tokio::test]
    async fn test_deep_linking_without_settings_fails() {
        let db = test_connection().await;
        register_platform(&db, vec!["1"]).await;
        let eng = engine(&db);
        let (state, nonce) = initiated_launch(&eng).await;

        let mut claims = resource_link_claims(&nonce, "1");
        claims[CLAIM_MESSAGE_TYPE] = json!(MESSAGE_TYPE_DEEP_LINKING);
        let token = sign_claims(&claims);

        let err = eng
            .complete(AuthenticationResponse {
                state: Some(state),
                id_token: Some(token),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LtiError::MissingParameter(_)));
    }

    #[tokio::test]
    async fn test_second_complete_fails_state_not_found() {
        let db = test_connection().await;
        register_platform(&db, vec!["1"]).await;
        let eng = engine(&db);
        let (state, nonce) = initiated_launch(&eng).await;
        let token = sign_claims(&resource_link_claims(&nonce, "1"));

        eng.complete(AuthenticationResponse {
            state: Some(state.clone()),
            id_token: Some(token.clone()),
        })
        .await
        .unwrap();

        let err = eng
            .complete(AuthenticationResponse {
                state: Some(state),
                id_token: Some(token),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LtiError::StateNotFound));
    }

    #[tokio::test]
    async fn test_concurrent_completes_have_one_winner() {
        let db = test_connection().await;
        register_platform(&db, vec!["1"]).await;
        let eng = Arc::new(engine(&db));
        let (state, nonce) = initiated_launch(&eng).await;
        let token = sign_claims(&resource_link_claims(&nonce, "1"));

        let a = {
            let eng = eng.clone();
            let state = state.clone();
            let token = token.clone();
            tokio::spawn(async move {
                eng.complete(AuthenticationResponse {
                    state: Some(state),
                    id_token: Some(token),
                })
                .await
            })
        };
        let b = tokio::spawn(async move {
            eng.complete(AuthenticationResponse {
                state: Some(state),
                id_token: Some(token),
            })
            .await
        });

        let (a, b) = tokio::join!(a, b);
        let results = [a.unwrap(), b.unwrap()];
        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_unregistered_deployment_fails() {
        let db = test_connection().await;
        register_platform(&db, vec!["1", "2"]).await;
        let eng = engine(&db);
        let (state, nonce) = initiated_launch(&eng).await;

        let token = sign_claims(&resource_link_claims(&nonce, "999"));
        let err = eng
            .complete(AuthenticationResponse {
                state: Some(state),
                id_token: Some(token),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LtiError::DeploymentMismatch(ref d) if d == "999"));
    }

    #[tokio::test]
    async fn test_unannounced_deployments_accept_any() {
        let db = test_connection().await;
        register_platform(&db, vec![]).await;
        let eng = engine(&db);
        let (state, nonce) = initiated_launch(&eng).await;

        let token = sign_claims(&resource_link_claims(&nonce, "anything"));
        let outcome = eng
            .complete(AuthenticationResponse {
                state: Some(state),
                id_token: Some(token),
            })
            .await
            .unwrap();
        assert_eq!(outcome.context().deployment_id.as_str(), "anything");
    }

    #[tokio::test]
    async fn test_complete_without_state_fails() {
        let db = test_connection().await;
        let err = engine(&db)
            .complete(AuthenticationResponse {
                state: None,
                id_token: Some("whatever".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LtiError::MissingParameter(ref name) if name == "state"));
    }

    #[tokio::test]
    async fn test_unknown_state_fails() {
        let db = test_connection().await;
        let err = engine(&db)
            .complete(AuthenticationResponse {
                state: Some("never-issued".to_string()),
                id_token: Some("whatever".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, LtiError::StateNotFound));
    }
}

//! IMS dynamic registration handshake.
//!
//! Two steps, both stateless on the tool side. The discovery step (GET)
//! fetches the platform's OpenID configuration and renders a
//! confirmation page that carries the configuration URL and
//! registration token forward. The registration step (POST) fetches the
//! configuration again, submits an RFC 7591 client registration to the
//! platform's registration endpoint, and persists the resulting
//! (issuer, client id) pair as a platform. Persistence is the last
//! step, so a failed handshake never leaves a partial registration.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::config::ToolConfig;
use crate::db::Db;
use crate::db::schema::{AuthConfig, AuthMethod, PlatformCreate, PlatformRecord};
use crate::error::{LtiError, LtiResult};
use crate::platform::PlatformRegistry;
use crate::types::{ClientId, Issuer};

pub const CLAIM_TOOL_CONFIGURATION: &str =
    "https://purl.imsglobal.org/spec/lti-tool-configuration";

const CONFIRMATION_TEMPLATE: &str = include_str!("registration_page.html");

/// Query parameters of both handshake steps.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegistrationRequest {
    pub openid_configuration: Option<String>,
    pub registration_token: Option<String>,
}

/// The subset of the platform's OpenID configuration the handshake uses.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenIdConfiguration {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub jwks_uri: String,
    pub registration_endpoint: Option<String>,
    #[serde(default)]
    pub claims_supported: Vec<String>,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti-platform-configuration")]
    pub platform_configuration: Option<PlatformConfiguration>,
}

/// The platform's LTI configuration claim, used for its display name.
#[derive(Debug, Clone, Deserialize)]
pub struct PlatformConfiguration {
    pub product_family_code: Option<String>,
    pub version: Option<String>,
}

/// One supported LTI message type in the registration payload.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationMessage {
    #[serde(rename = "type")]
    pub message_type: String,
}

/// The LTI tool configuration claim sent with the registration.
#[derive(Debug, Clone, Serialize)]
pub struct ToolConfigurationClaim {
    pub domain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub target_link_uri: String,
    pub custom_parameters: BTreeMap<String, String>,
    pub claims: Vec<String>,
    pub messages: Vec<RegistrationMessage>,
}

/// RFC 7591 client registration payload.
#[derive(Debug, Clone, Serialize)]
pub struct ClientRegistration {
    pub application_type: String,
    pub response_types: Vec<String>,
    pub grant_types: Vec<String>,
    pub initiate_login_uri: String,
    pub redirect_uris: Vec<String>,
    pub client_name: String,
    pub jwks_uri: String,
    pub logo_uri: String,
    pub token_endpoint_auth_method: String,
    pub scope: String,
    #[serde(rename = "https://purl.imsglobal.org/spec/lti-tool-configuration")]
    pub tool_configuration: ToolConfigurationClaim,
}

/// The fields of the platform's registration response the tool keeps.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRegistrationResponse {
    pub client_id: String,
}

/// Drives the two-step registration handshake against one platform.
pub struct DynamicRegistration {
    registry: PlatformRegistry,
    client: reqwest::Client,
    tool: ToolConfig,
}

impl DynamicRegistration {
    pub fn new(db: Db, tool: ToolConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");
        Self {
            registry: PlatformRegistry::new(db),
            client,
            tool,
        }
    }

    /// Discovery step: fetch the platform's OpenID configuration and
    /// render the confirmation page that carries the handshake forward.
    pub async fn discovery_page(&self, params: &RegistrationRequest) -> LtiResult<String> {
        let config_url = params
            .openid_configuration
            .as_deref()
            .ok_or_else(|| LtiError::MissingParameter("openid_configuration".to_string()))?;

        let configuration = self.fetch_configuration(config_url).await?;
        debug!(issuer = %configuration.issuer, "Rendering registration confirmation page");

        Ok(render_confirmation_page(&configuration.issuer, config_url))
    }

    /// Registration step: submit the client registration and persist
    /// the platform.
    ///
    /// `custom_overrides` come from the confirmation form and extend
    /// the tool's configured custom parameters for this platform.
    /// Fails `AlreadyRegistered` when the (issuer, client id) pair
    /// exists, unless re-registration is enabled in the tool config.
    pub async fn register(
        &self,
        params: &RegistrationRequest,
        custom_overrides: Option<BTreeMap<String, String>>,
    ) -> LtiResult<PlatformRecord> {
        let config_url = params
            .openid_configuration
            .as_deref()
            .ok_or_else(|| LtiError::MissingParameter("openid_configuration".to_string()))?;

        let configuration = self.fetch_configuration(config_url).await?;
        let registration_endpoint = configuration.registration_endpoint.as_deref().ok_or_else(
            || {
                LtiError::RegistrationFailed(
                    "Platform configuration does not advertise a registration endpoint"
                        .to_string(),
                )
            },
        )?;

        let payload = self.registration_payload(&configuration, custom_overrides)?;

        let mut request = self.client.post(registration_endpoint).json(&payload);
        if let Some(token) = params.registration_token.as_deref() {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|e| {
            LtiError::RegistrationFailed(format!("Client registration request failed: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(LtiError::RegistrationFailed(format!(
                "Registration endpoint returned {}",
                response.status()
            )));
        }
        let registered: ClientRegistrationResponse = response.json().await.map_err(|e| {
            LtiError::RegistrationFailed(format!("Malformed registration response: {}", e))
        })?;

        let data = self.platform_data(&configuration, &registered.client_id);
        let record = match self.registry.register(data.clone()).await {
            Err(LtiError::AlreadyRegistered { .. }) if self.tool.allow_reregistration => {
                self.registry.re_register(data).await?
            }
            other => other?,
        };

        info!(
            issuer = %record.issuer,
            client_id = %record.client_id,
            active = record.is_active,
            "Dynamic registration completed"
        );
        Ok(record)
    }

    async fn fetch_configuration(&self, url: &str) -> LtiResult<OpenIdConfiguration> {
        let response = self.client.get(url).send().await.map_err(|e| {
            LtiError::RegistrationFailed(format!("Fetching OpenID configuration failed: {}", e))
        })?;
        if !response.status().is_success() {
            return Err(LtiError::RegistrationFailed(format!(
                "OpenID configuration endpoint returned {}",
                response.status()
            )));
        }
        response.json().await.map_err(|e| {
            LtiError::RegistrationFailed(format!("Malformed OpenID configuration: {}", e))
        })
    }

    fn registration_payload(
        &self,
        configuration: &OpenIdConfiguration,
        custom_overrides: Option<BTreeMap<String, String>>,
    ) -> LtiResult<ClientRegistration> {
        let tool_url = Url::parse(&self.tool.url).map_err(|e| {
            LtiError::Internal(format!("Tool URL is not a valid URL: {}", e))
        })?;
        let domain = tool_url
            .host_str()
            .ok_or_else(|| LtiError::Internal("Tool URL has no host".to_string()))?
            .to_string();

        let mut custom_parameters = self.tool.custom_parameters.clone();
        if let Some(overrides) = custom_overrides {
            custom_parameters.extend(overrides);
        }

        Ok(ClientRegistration {
            application_type: "web".to_string(),
            response_types: vec!["id_token".to_string()],
            grant_types: vec!["implicit".to_string(), "client_credentials".to_string()],
            initiate_login_uri: self.tool.login_url(),
            redirect_uris: self.tool.effective_redirect_uris(),
            client_name: self.tool.name.clone(),
            jwks_uri: format!("{}/keys", self.tool.url.trim_end_matches('/')),
            logo_uri: self.tool.effective_logo(),
            token_endpoint_auth_method: "private_key_jwt".to_string(),
            scope: "openid".to_string(),
            tool_configuration: ToolConfigurationClaim {
                domain,
                description: self.tool.description.clone(),
                target_link_uri: self.tool.launch_url(),
                custom_parameters,
                claims: configuration.claims_supported.clone(),
                messages: vec![
                    RegistrationMessage {
                        message_type: "LtiResourceLinkRequest".to_string(),
                    },
                    RegistrationMessage {
                        message_type: "LtiDeepLinkingRequest".to_string(),
                    },
                ],
            },
        })
    }

    fn platform_data(
        &self,
        configuration: &OpenIdConfiguration,
        client_id: &str,
    ) -> PlatformCreate {
        let name = configuration
            .platform_configuration
            .as_ref()
            .and_then(|p| p.product_family_code.clone())
            .unwrap_or_else(|| "Platform".to_string());

        PlatformCreate {
            issuer: Issuer::new(configuration.issuer.clone()),
            client_id: ClientId::new(client_id),
            name,
            authentication_endpoint: configuration.authorization_endpoint.clone(),
            accesstoken_endpoint: configuration.token_endpoint.clone(),
            auth_config: AuthConfig {
                method: AuthMethod::JwkSet,
                key: configuration.jwks_uri.clone(),
            },
            deployment_ids: vec![],
            is_active: self.tool.auto_activate,
        }
    }
}

/// Substitute the handshake values into the confirmation template.
///
/// The displayed values come straight from the platform's query
/// string, so they are HTML-escaped. The page itself forwards its own
/// query string on confirmation; nothing user-controlled lands in the
/// script block.
pub fn render_confirmation_page(issuer: &str, config_url: &str) -> String {
    CONFIRMATION_TEMPLATE
        .replace("PLATFORM_ISSUER", &escape_html(issuer))
        .replace("OPENID_CONFIGURATION", &escape_html(config_url))
}

fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_connection;
    use serde_json::json;

    fn tool() -> ToolConfig {
        serde_json::from_value(json!({
            "url": "https://tool.example.com",
            "name": "Example Tool",
            "description": "An example tool",
            "custom_parameters": { "key": "value" }
        }))
        .unwrap()
    }

    fn configuration(registration_endpoint: Option<&str>) -> OpenIdConfiguration {
        serde_json::from_value(json!({
            "issuer": "https://lms.example.edu",
            "authorization_endpoint": "https://lms.example.edu/auth",
            "token_endpoint": "https://lms.example.edu/token",
            "jwks_uri": "https://lms.example.edu/jwks",
            "registration_endpoint": registration_endpoint,
            "claims_supported": ["iss", "sub", "name"],
            "https://purl.imsglobal.org/spec/lti-platform-configuration": {
                "product_family_code": "moodle",
                "version": "4.3"
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_discovery_without_configuration_param_fails() {
        let reg = DynamicRegistration::new(test_connection().await, tool());

        let err = reg
            .discovery_page(&RegistrationRequest::default())
            .await
            .unwrap_err();
        assert!(
            matches!(err, LtiError::MissingParameter(ref name) if name == "openid_configuration")
        );
    }

    #[tokio::test]
    async fn test_register_without_configuration_param_persists_nothing() {
        let db = test_connection().await;
        let reg = DynamicRegistration::new(db.clone(), tool());

        let err = reg
            .register(&RegistrationRequest::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LtiError::MissingParameter(_)));

        let platforms = PlatformRegistry::new(db).list().await.unwrap();
        assert!(platforms.is_empty());
    }

    #[tokio::test]
    async fn test_registration_payload_shape() {
        let reg = DynamicRegistration::new(test_connection().await, tool());
        let overrides = BTreeMap::from([("course".to_string(), "cs101".to_string())]);

        let payload = reg
            .registration_payload(&configuration(Some("https://lms.example.edu/register")), Some(overrides))
            .unwrap();

        assert_eq!(payload.application_type, "web");
        assert_eq!(payload.response_types, vec!["id_token"]);
        assert_eq!(payload.initiate_login_uri, "https://tool.example.com/login");
        assert_eq!(payload.redirect_uris, vec!["https://tool.example.com/launch"]);
        assert_eq!(payload.jwks_uri, "https://tool.example.com/keys");
        assert_eq!(payload.scope, "openid");
        assert_eq!(payload.tool_configuration.domain, "tool.example.com");
        assert_eq!(
            payload.tool_configuration.target_link_uri,
            "https://tool.example.com/launch"
        );
        assert_eq!(
            payload.tool_configuration.custom_parameters.get("key"),
            Some(&"value".to_string())
        );
        assert_eq!(
            payload.tool_configuration.custom_parameters.get("course"),
            Some(&"cs101".to_string())
        );
        assert_eq!(payload.tool_configuration.claims, vec!["iss", "sub", "name"]);

        let encoded = serde_json::to_value(&payload).unwrap();
        assert!(encoded.get(CLAIM_TOOL_CONFIGURATION).is_some());
        let messages = encoded[CLAIM_TOOL_CONFIGURATION]["messages"]
            .as_array()
            .unwrap();
        assert_eq!(messages[0]["type"], "LtiResourceLinkRequest");
        assert_eq!(messages[1]["type"], "LtiDeepLinkingRequest");
    }

    #[tokio::test]
    async fn test_platform_data_mapping() {
        let reg = DynamicRegistration::new(test_connection().await, tool());
        let config = configuration(Some("https://lms.example.edu/register"));

        let data = reg.platform_data(&config, "client-99");
        assert_eq!(data.issuer.as_str(), "https://lms.example.edu");
        assert_eq!(data.client_id.as_str(), "client-99");
        assert_eq!(data.name, "moodle");
        assert_eq!(data.auth_config.method, AuthMethod::JwkSet);
        assert_eq!(data.auth_config.key, "https://lms.example.edu/jwks");
        assert!(data.is_active);
    }

    #[test]
    fn test_configuration_without_registration_endpoint_parses() {
        let config = configuration(None);
        assert!(config.registration_endpoint.is_none());
    }

    #[test]
    fn test_confirmation_page_substitutes_and_escapes() {
        let page = render_confirmation_page(
            "https://lms.example.edu/<script>",
            "https://lms.example.edu/.well-known/openid-configuration?a=1&b=2",
        );

        assert!(page.contains("https://lms.example.edu/&lt;script&gt;"));
        assert!(page.contains("a=1&amp;b=2"));
        assert!(!page.contains("PLATFORM_ISSUER"));
        assert!(!page.contains("OPENID_CONFIGURATION"));
        assert!(!page.contains("/<script>"));
    }
}

use serde::Deserialize;
use std::{collections::BTreeMap, env, fs, path::PathBuf};

/// Tool metadata and route configuration, loaded from `tool.json`.
///
/// String values may contain `${VAR}` references which are expanded from
/// the environment at load time, so deployments can keep one config file
/// across environments and inject the public URL per host.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolConfig {
    /// Public base URL of this tool (no trailing slash).
    pub url: String,

    /// Display name sent to platforms during registration.
    pub name: String,

    /// Logo URL advertised to platforms.
    #[serde(default)]
    pub logo: Option<String>,

    /// Short description advertised to platforms.
    #[serde(default)]
    pub description: Option<String>,

    /// Redirect URIs registered with platforms. Defaults to the launch
    /// endpoint under `url`.
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Custom parameters requested in the tool configuration claim.
    #[serde(default)]
    pub custom_parameters: BTreeMap<String, String>,

    /// Whether dynamically registered platforms start active.
    #[serde(default = "default_true")]
    pub auto_activate: bool,

    /// Whether a dynamic registration may replace an existing
    /// (issuer, client id) record.
    #[serde(default)]
    pub allow_reregistration: bool,

    /// Directory of static assets served at the root.
    #[serde(default = "default_static_dir")]
    pub static_dir: String,

    /// Login initiation route.
    #[serde(default = "default_login_route")]
    pub login_route: String,

    /// Launch (authentication response) route.
    #[serde(default = "default_launch_route")]
    pub launch_route: String,

    /// Dynamic registration route.
    #[serde(default = "default_registration_route")]
    pub registration_route: String,
}

fn default_true() -> bool {
    true
}

fn default_static_dir() -> String {
    "public".to_string()
}

fn default_login_route() -> String {
    "/login".to_string()
}

fn default_launch_route() -> String {
    "/launch".to_string()
}

fn default_registration_route() -> String {
    "/register".to_string()
}

impl ToolConfig {
    /// The redirect URIs to register, falling back to `{url}{launch_route}`.
    pub fn effective_redirect_uris(&self) -> Vec<String> {
        if self.redirect_uris.is_empty() {
            vec![format!("{}{}", self.url, self.launch_route)]
        } else {
            self.redirect_uris.clone()
        }
    }

    /// The logo URL to advertise, falling back to `{url}/assets/logo.svg`.
    pub fn effective_logo(&self) -> String {
        self.logo
            .clone()
            .unwrap_or_else(|| format!("{}/assets/logo.svg", self.url))
    }

    /// Absolute launch URL (the tool's target link and redirect URI).
    pub fn launch_url(&self) -> String {
        format!("{}{}", self.url, self.launch_route)
    }

    /// Absolute login initiation URL.
    pub fn login_url(&self) -> String {
        format!("{}{}", self.url, self.login_route)
    }
}

pub fn resolve_tool_json_path() -> anyhow::Result<PathBuf> {
    if let Ok(p) = env::var("LTI_CONFIG") {
        return Ok(PathBuf::from(p));
    }

    if let Ok(xdg) = env::var("XDG_CONFIG_HOME") {
        let candidate = PathBuf::from(xdg).join("lti").join("tool.json");
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let candidate = PathBuf::from("tool.json");
    if candidate.exists() {
        return Ok(candidate);
    }

    Err(anyhow::anyhow!(
        "Could not find tool.json (set LTI_CONFIG or create ./tool.json)"
    ))
}

fn expand_env_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next(); // consume '{'
            let mut name = String::new();
            while let Some(c) = chars.next() {
                if c == '}' {
                    break;
                }
                name.push(c);
            }
            if let Ok(val) = env::var(&name) {
                out.push_str(&val);
            } else {
                out.push_str("${");
                out.push_str(&name);
                out.push('}');
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn expand_config(cfg: ToolConfig) -> ToolConfig {
    let mut cfg = cfg;

    cfg.url = expand_env_vars(&cfg.url);
    cfg.name = expand_env_vars(&cfg.name);
    if let Some(logo) = cfg.logo.as_mut() {
        *logo = expand_env_vars(logo);
    }
    if let Some(desc) = cfg.description.as_mut() {
        *desc = expand_env_vars(desc);
    }
    cfg.redirect_uris = cfg
        .redirect_uris
        .into_iter()
        .map(|u| expand_env_vars(&u))
        .collect();
    for val in cfg.custom_parameters.values_mut() {
        *val = expand_env_vars(val);
    }
    cfg.static_dir = expand_env_vars(&cfg.static_dir);

    cfg
}

pub fn load_tool_config() -> anyhow::Result<ToolConfig> {
    let path = resolve_tool_json_path()?;
    load_tool_config_from(&path)
}

pub fn load_tool_config_from(path: &std::path::Path) -> anyhow::Result<ToolConfig> {
    let raw = fs::read_to_string(path)?;
    let cfg: ToolConfig = serde_json::from_str(&raw)?;
    Ok(expand_config(cfg))
}

// HTTP dispatch for the tool's LTI endpoints.
//
// Routes cover login initiation, launch completion, the dynamic
// registration handshake, the tool keyset and a health probe; anything
// else falls through to the static asset directory. Launch outcomes are
// handed to caller-supplied callbacks that answer with an opaque
// `ResponseDirective`, mapped to an HTTP response here at the edge.

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    extract::{Form, Query, State},
    http::{StatusCode, header},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::ToolConfig;
use crate::db::Db;
use crate::error::LtiError;
use crate::launch::{
    AuthenticationResponse, DeepLinkingSettings, LaunchContext, LaunchEngine, LaunchOutcome,
    LoginInitiation,
};
use crate::registration::{DynamicRegistration, RegistrationRequest};
use crate::trust::KeyStore;

/// How a launch callback wants the HTTP response rendered.
#[derive(Debug, Clone)]
pub enum ResponseDirective {
    /// Serve a file from disk (HTML content type).
    ServeFile(PathBuf),
    /// Serve an HTML body.
    Html(String),
    /// Redirect, with extra query parameters appended.
    Redirect {
        location: String,
        query: Vec<(String, String)>,
    },
    /// Serve a JSON body.
    Json(Value),
}

/// Hooks a tool implements to answer validated launches.
pub trait LaunchCallbacks: Send + Sync {
    fn on_launch(&self, context: &LaunchContext) -> ResponseDirective;
    fn on_deep_linking(
        &self,
        context: &LaunchContext,
        settings: &DeepLinkingSettings,
    ) -> ResponseDirective;
}

/// Callbacks matching the stock tool behavior: launches serve the
/// static app shell, deep linking redirects to the picker route.
pub struct DefaultCallbacks {
    static_dir: PathBuf,
}

impl DefaultCallbacks {
    pub fn new(static_dir: impl Into<PathBuf>) -> Self {
        Self {
            static_dir: static_dir.into(),
        }
    }
}

impl LaunchCallbacks for DefaultCallbacks {
    fn on_launch(&self, _context: &LaunchContext) -> ResponseDirective {
        ResponseDirective::ServeFile(self.static_dir.join("index.html"))
    }

    fn on_deep_linking(
        &self,
        _context: &LaunchContext,
        _settings: &DeepLinkingSettings,
    ) -> ResponseDirective {
        ResponseDirective::Redirect {
            location: "/deeplink".to_string(),
            query: vec![("newResource".to_string(), "true".to_string())],
        }
    }
}

pub struct AppState {
    pub launch: LaunchEngine,
    pub registration: DynamicRegistration,
    pub callbacks: Arc<dyn LaunchCallbacks>,
    pub config: ToolConfig,
}

impl AppState {
    pub fn new(db: Db, config: ToolConfig, callbacks: Arc<dyn LaunchCallbacks>) -> Self {
        let key_store = Arc::new(KeyStore::default());
        Self {
            launch: LaunchEngine::new(db.clone(), key_store, config.launch_url()),
            registration: DynamicRegistration::new(db, config.clone()),
            callbacks,
            config,
        }
    }
}

pub type SharedState = Arc<AppState>;

/// Optional body of the registration POST, used by confirmation pages
/// that collect extra custom parameters.
#[derive(Debug, Default, Deserialize)]
pub struct RegistrationOverrides {
    #[serde(default)]
    pub custom_parameters: Option<std::collections::BTreeMap<String, String>>,
}

pub fn create_router(state: SharedState) -> Router {
    let config = &state.config;
    Router::new()
        .route("/health", get(health_check))
        .route("/keys", get(keyset))
        .route(&config.login_route, get(login_get).post(login_post))
        .route(&config.launch_route, post(launch))
        .route(
            &config.registration_route,
            get(register_get).post(register_post),
        )
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// The tool's public keyset. Empty: this tool makes no signed service
/// calls, it only verifies platform tokens.
async fn keyset() -> Json<Value> {
    Json(json!({ "keys": [] }))
}

async fn login_get(
    State(state): State<SharedState>,
    Query(params): Query<LoginInitiation>,
) -> Response {
    do_login(state, params).await
}

async fn login_post(
    State(state): State<SharedState>,
    Form(params): Form<LoginInitiation>,
) -> Response {
    do_login(state, params).await
}

async fn do_login(state: SharedState, params: LoginInitiation) -> Response {
    match state.launch.initiate(params).await {
        Ok(url) => Redirect::to(url.as_str()).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn launch(
    State(state): State<SharedState>,
    Form(params): Form<AuthenticationResponse>,
) -> Response {
    match state.launch.complete(params).await {
        Ok(LaunchOutcome::ResourceLink(context)) => {
            directive_response(state.callbacks.on_launch(&context)).await
        }
        Ok(LaunchOutcome::DeepLinking(context, settings)) => {
            directive_response(state.callbacks.on_deep_linking(&context, &settings)).await
        }
        Err(e) => error_response(&e),
    }
}

async fn register_get(
    State(state): State<SharedState>,
    Query(params): Query<RegistrationRequest>,
) -> Response {
    match state.registration.discovery_page(&params).await {
        Ok(page) => Html(page).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn register_post(
    State(state): State<SharedState>,
    Query(params): Query<RegistrationRequest>,
    overrides: Option<Json<RegistrationOverrides>>,
) -> Response {
    let custom = overrides.and_then(|Json(o)| o.custom_parameters);
    match state.registration.register(&params, custom).await {
        Ok(record) => Json(json!({
            "status": "success",
            "platform": {
                "issuer": record.issuer,
                "client_id": record.client_id,
                "name": record.name,
                "active": record.is_active,
            }
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

async fn directive_response(directive: ResponseDirective) -> Response {
    match directive {
        ResponseDirective::ServeFile(path) => match tokio::fs::read(&path).await {
            Ok(bytes) => (
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                bytes,
            )
                .into_response(),
            Err(e) => error_response(&LtiError::Internal(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            ))),
        },
        ResponseDirective::Html(body) => Html(body).into_response(),
        ResponseDirective::Redirect { location, query } => {
            let target = if query.is_empty() {
                location
            } else {
                let encoded: String = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(query)
                    .finish();
                let separator = if location.contains('?') { '&' } else { '?' };
                format!("{}{}{}", location, separator, encoded)
            };
            Redirect::to(&target).into_response()
        }
        ResponseDirective::Json(value) => Json(value).into_response(),
    }
}

/// Render an engine error as the wire envelope.
fn error_response(err: &LtiError) -> Response {
    let status = err.status();
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(error = %err, "Request failed");
    }
    (
        status,
        Json(json!({
            "status": status.as_u16(),
            "error": err.reason(),
            "details": { "message": err.to_string() }
        })),
    )
        .into_response()
}

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use lti_provider::db::QueryBuilder;
use lti_provider::db::schema::{AuthConfig, AuthMethod, PlatformCreate};
use lti_provider::types::{ClientId, DeploymentId, Issuer};
use lti_provider::{
    AppState, DatabaseConfig, DefaultCallbacks, PlatformRegistry, create_connection,
    create_router, ensure_schema, load_tool_config, load_tool_config_from,
};

#[derive(Parser)]
#[command(name = "lti-provider")]
#[command(about = "LTI 1.3 tool launch and registration provider")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the tool endpoints
    Server {
        #[arg(short, long, default_value = "3000")]
        port: u16,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
        /// Path to tool.json (defaults to the LTI_CONFIG / XDG lookup)
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Initialize the database schema
    Init {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Register a platform manually
    RegisterPlatform {
        #[arg(long)]
        issuer: String,
        #[arg(long)]
        client_id: String,
        #[arg(long)]
        name: String,
        /// OIDC authorization endpoint of the platform
        #[arg(long)]
        auth_endpoint: String,
        /// OAuth2 token endpoint of the platform
        #[arg(long)]
        token_endpoint: String,
        /// JWK_SET, JWK_KEY or RSA_KEY
        #[arg(long, default_value = "JWK_SET")]
        auth_method: String,
        /// JWK set URL, inline JWK set, or PEM, depending on --auth-method
        #[arg(long)]
        key: String,
        /// Comma-separated deployment ids announced by the platform
        #[arg(long)]
        deployment_ids: Option<String>,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// List all registered platforms
    ListPlatforms {
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Activate a platform registration
    ActivatePlatform {
        issuer: String,
        client_id: String,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
    /// Deactivate a platform registration
    DeactivatePlatform {
        issuer: String,
        client_id: String,
        #[arg(long, default_value = "memory", env = "SURREALDB_URL")]
        db_url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("lti_provider=info".parse()?),
        )
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Server {
            port,
            db_url,
            config,
        } => {
            let tool = match config {
                Some(path) => load_tool_config_from(&path)?,
                None => load_tool_config()?,
            };
            info!("Loaded tool configuration for {}", tool.url);

            let db = connect(db_url).await?;
            let callbacks = Arc::new(DefaultCallbacks::new(tool.static_dir.clone()));
            let state = Arc::new(AppState::new(db, tool, callbacks));
            let app = create_router(state);

            let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
            info!("Tool listening on http://0.0.0.0:{}", port);
            axum::serve(listener, app).await?;
        }
        Commands::Init { db_url } => {
            info!("Initializing database...");
            connect(db_url).await?;
            info!("Database initialized successfully");
        }
        Commands::RegisterPlatform {
            issuer,
            client_id,
            name,
            auth_endpoint,
            token_endpoint,
            auth_method,
            key,
            deployment_ids,
            db_url,
        } => {
            let db = connect(db_url).await?;
            let registry = PlatformRegistry::new(db);

            let data = PlatformCreate {
                issuer: Issuer::new(issuer),
                client_id: ClientId::new(client_id),
                name,
                authentication_endpoint: auth_endpoint,
                accesstoken_endpoint: token_endpoint,
                auth_config: AuthConfig {
                    method: parse_auth_method(&auth_method)?,
                    key,
                },
                deployment_ids: deployment_ids
                    .map(|ids| {
                        ids.split(',')
                            .map(str::trim)
                            .filter(|id| !id.is_empty())
                            .map(DeploymentId::new)
                            .collect()
                    })
                    .unwrap_or_default(),
                is_active: true,
            };

            let record = registry.register(data).await?;
            println!(
                "Registered platform {} (client id {})",
                record.issuer, record.client_id
            );
        }
        Commands::ListPlatforms { db_url } => {
            let db = connect(db_url).await?;
            let platforms = QueryBuilder::list_platforms(&db).await?;

            if platforms.is_empty() {
                println!("No platforms registered.");
                return Ok(());
            }

            println!(
                "{:<40} {:<20} {:<20} {:<8} {:<8}",
                "ISSUER", "CLIENT ID", "NAME", "ACTIVE", "AUTH"
            );
            println!("{}", "-".repeat(100));
            for p in platforms {
                let auth = match p.auth_config.method {
                    AuthMethod::JwkSet => "JWK_SET",
                    AuthMethod::JwkKey => "JWK_KEY",
                    AuthMethod::RsaKey => "RSA_KEY",
                };
                println!(
                    "{:<40} {:<20} {:<20} {:<8} {:<8}",
                    p.issuer.as_str(),
                    p.client_id.as_str(),
                    p.name,
                    if p.is_active { "yes" } else { "no" },
                    auth
                );
            }
        }
        Commands::ActivatePlatform {
            issuer,
            client_id,
            db_url,
        } => {
            let db = connect(db_url).await?;
            let record = PlatformRegistry::new(db)
                .activate(&Issuer::new(issuer), &ClientId::new(client_id))
                .await?;
            println!(
                "Platform {} (client id {}) is now active",
                record.issuer, record.client_id
            );
        }
        Commands::DeactivatePlatform {
            issuer,
            client_id,
            db_url,
        } => {
            let db = connect(db_url).await?;
            let record = PlatformRegistry::new(db)
                .deactivate(&Issuer::new(issuer), &ClientId::new(client_id))
                .await?;
            println!(
                "Platform {} (client id {}) is now inactive",
                record.issuer, record.client_id
            );
        }
    }

    Ok(())
}

async fn connect(db_url: String) -> Result<lti_provider::Db> {
    let config = DatabaseConfig {
        url: db_url,
        ..Default::default()
    };
    info!("Using database url: {}", config.url);
    let db = create_connection(config).await?;
    ensure_schema(&db).await?;
    Ok(db)
}

fn parse_auth_method(value: &str) -> Result<AuthMethod> {
    match value {
        "JWK_SET" => Ok(AuthMethod::JwkSet),
        "JWK_KEY" => Ok(AuthMethod::JwkKey),
        "RSA_KEY" => Ok(AuthMethod::RsaKey),
        other => anyhow::bail!(
            "Unknown auth method '{}' (expected JWK_SET, JWK_KEY or RSA_KEY)",
            other
        ),
    }
}

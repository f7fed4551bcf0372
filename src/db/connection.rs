use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;
use surrealdb::Surreal;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::Root;

pub type Db = Surreal<Any>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: env::var("SURREALDB_URL").unwrap_or_else(|_| "memory".to_string()),
            namespace: env::var("SURREALDB_NAMESPACE").unwrap_or_else(|_| "lti".to_string()),
            database: env::var("SURREALDB_DATABASE").unwrap_or_else(|_| "provider".to_string()),
            username: env::var("SURREALDB_USERNAME").ok(),
            password: env::var("SURREALDB_PASSWORD").ok(),
        }
    }
}

pub async fn create_connection(config: DatabaseConfig) -> Result<Db> {
    let db = surrealdb::engine::any::connect(config.url).await?;

    // Sign in if credentials are provided
    if let (Some(username), Some(password)) = (config.username, config.password) {
        db.signin(Root {
            username: &username,
            password: &password,
        })
        .await?;
    }

    // Use the specified namespace and database
    db.use_ns(config.namespace).use_db(config.database).await?;

    Ok(db)
}

pub async fn ensure_schema(db: &Db) -> Result<()> {
    // Define schema for each table. Uniqueness constraints live here so
    // that concurrent writers race at the storage layer, not in process.
    let schema_queries = vec![
        // Platform registrations
        "DEFINE TABLE platform SCHEMAFULL;
         DEFINE FIELD issuer ON TABLE platform TYPE string;
         DEFINE FIELD client_id ON TABLE platform TYPE string;
         DEFINE FIELD name ON TABLE platform TYPE string;
         DEFINE FIELD authentication_endpoint ON TABLE platform TYPE string;
         DEFINE FIELD accesstoken_endpoint ON TABLE platform TYPE string;
         DEFINE FIELD auth_config ON TABLE platform FLEXIBLE TYPE object;
         DEFINE FIELD deployment_ids ON TABLE platform TYPE array<string> DEFAULT [];
         DEFINE FIELD is_active ON TABLE platform TYPE bool DEFAULT true;
         DEFINE FIELD created_at ON TABLE platform TYPE datetime;
         DEFINE FIELD updated_at ON TABLE platform TYPE datetime;",
        // One registration per (issuer, client_id)
        "DEFINE INDEX platform_identity ON TABLE platform COLUMNS issuer, client_id UNIQUE;",
        // Pending login initiations awaiting their authentication response
        "DEFINE TABLE launch_state SCHEMAFULL;
         DEFINE FIELD state ON TABLE launch_state TYPE string;
         DEFINE FIELD nonce ON TABLE launch_state TYPE string;
         DEFINE FIELD issuer ON TABLE launch_state TYPE string;
         DEFINE FIELD client_id ON TABLE launch_state TYPE string;
         DEFINE FIELD target_link_uri ON TABLE launch_state TYPE option<string>;
         DEFINE FIELD message_hint ON TABLE launch_state TYPE option<string>;
         DEFINE FIELD deployment_hint ON TABLE launch_state TYPE option<string>;
         DEFINE FIELD expires_at ON TABLE launch_state TYPE datetime;",
        "DEFINE INDEX launch_state_token ON TABLE launch_state COLUMNS state UNIQUE;",
        // Consumed nonces; insert-once is the replay guard
        "DEFINE TABLE nonce SCHEMAFULL;
         DEFINE FIELD issuer ON TABLE nonce TYPE string;
         DEFINE FIELD value ON TABLE nonce TYPE string;
         DEFINE FIELD expires_at ON TABLE nonce TYPE datetime;",
        "DEFINE INDEX nonce_identity ON TABLE nonce COLUMNS issuer, value UNIQUE;",
    ];

    for query in schema_queries {
        db.query(query).await?;
    }

    Ok(())
}

#[cfg(test)]
pub async fn test_connection() -> Db {
    let config = DatabaseConfig {
        url: "memory".to_string(),
        namespace: "lti_test".to_string(),
        database: format!("t_{}", uuid::Uuid::new_v4().simple()),
        username: None,
        password: None,
    };
    let db = create_connection(config).await.unwrap();
    ensure_schema(&db).await.unwrap();
    db
}

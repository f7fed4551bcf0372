// Database query helpers for SurrealDB.
//
// Uniqueness and single-use guarantees are enforced by the storage layer
// (unique indexes, single-statement conditional deletes) so concurrent
// requests never need an in-process lock.

use crate::db::schema::*;
use crate::types::{ClientId, Issuer, Nonce, StateToken};
use anyhow::{Result, anyhow};
use sha2::{Digest, Sha256};
use surrealdb::{RecordId, Surreal, engine::any::Any, sql::Datetime};

pub struct QueryBuilder;

/// Deterministic record id for a platform, so re-registration of the same
/// (issuer, client id) pair addresses the same row.
pub fn platform_record_id(issuer: &Issuer, client_id: &ClientId) -> RecordId {
    let mut hasher = Sha256::new();
    hasher.update(issuer.as_str().as_bytes());
    hasher.update(client_id.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    RecordId::from_table_key("platform", &digest[..16])
}

fn is_duplicate_error(msg: &str) -> bool {
    msg.contains("already contains") || msg.contains("already exists")
}

impl QueryBuilder {
    /// Insert a new platform registration.
    ///
    /// Returns `Ok(None)` when a record for the same (issuer, client id)
    /// already exists; the storage index is authoritative for that check.
    pub async fn create_platform(
        db: &Surreal<Any>,
        data: &PlatformCreate,
    ) -> Result<Option<PlatformRecord>> {
        let id = platform_record_id(&data.issuer, &data.client_id);
        let mut res = db
            .query(
                r#"
                CREATE $id SET
                    issuer = $issuer,
                    client_id = $client_id,
                    name = $name,
                    authentication_endpoint = $authentication_endpoint,
                    accesstoken_endpoint = $accesstoken_endpoint,
                    auth_config = $auth_config,
                    deployment_ids = $deployment_ids,
                    is_active = $is_active,
                    created_at = time::now(),
                    updated_at = time::now()
                "#,
            )
            .bind(("id", id))
            .bind(("issuer", data.issuer.clone()))
            .bind(("client_id", data.client_id.clone()))
            .bind(("name", data.name.clone()))
            .bind((
                "authentication_endpoint",
                data.authentication_endpoint.clone(),
            ))
            .bind(("accesstoken_endpoint", data.accesstoken_endpoint.clone()))
            .bind(("auth_config", data.auth_config.clone()))
            .bind(("deployment_ids", data.deployment_ids.clone()))
            .bind(("is_active", data.is_active))
            .await?;

        match res.take::<Option<PlatformRecord>>(0) {
            Ok(created) => {
                let record = created.ok_or_else(|| anyhow!("failed to create platform record"))?;
                Ok(Some(record))
            }
            Err(e) if is_duplicate_error(&e.to_string()) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the registration data of an existing platform.
    ///
    /// Returns `Ok(None)` when no record exists for the pair.
    pub async fn update_platform(
        db: &Surreal<Any>,
        data: &PlatformCreate,
    ) -> Result<Option<PlatformRecord>> {
        let id = platform_record_id(&data.issuer, &data.client_id);
        let mut res = db
            .query(
                r#"
                UPDATE $id SET
                    issuer = $issuer,
                    client_id = $client_id,
                    name = $name,
                    authentication_endpoint = $authentication_endpoint,
                    accesstoken_endpoint = $accesstoken_endpoint,
                    auth_config = $auth_config,
                    deployment_ids = $deployment_ids,
                    is_active = $is_active,
                    updated_at = time::now()
                "#,
            )
            .bind(("id", id))
            .bind(("issuer", data.issuer.clone()))
            .bind(("client_id", data.client_id.clone()))
            .bind(("name", data.name.clone()))
            .bind((
                "authentication_endpoint",
                data.authentication_endpoint.clone(),
            ))
            .bind(("accesstoken_endpoint", data.accesstoken_endpoint.clone()))
            .bind(("auth_config", data.auth_config.clone()))
            .bind(("deployment_ids", data.deployment_ids.clone()))
            .bind(("is_active", data.is_active))
            .await?;

        let updated: Option<PlatformRecord> = res.take(0)?;
        Ok(updated)
    }

    pub async fn find_platform(
        db: &Surreal<Any>,
        issuer: &Issuer,
        client_id: &ClientId,
    ) -> Result<Option<PlatformRecord>> {
        let mut res = db
            .query(
                r#"
                SELECT * FROM platform
                WHERE issuer = $issuer AND client_id = $client_id
                LIMIT 1
                "#,
            )
            .bind(("issuer", issuer.clone()))
            .bind(("client_id", client_id.clone()))
            .await?;

        let platform: Option<PlatformRecord> = res.take(0)?;
        Ok(platform)
    }

    pub async fn find_platforms_by_issuer(
        db: &Surreal<Any>,
        issuer: &Issuer,
    ) -> Result<Vec<PlatformRecord>> {
        let mut res = db
            .query(
                r#"
                SELECT * FROM platform
                WHERE issuer = $issuer
                ORDER BY client_id ASC
                "#,
            )
            .bind(("issuer", issuer.clone()))
            .await?;

        let platforms: Vec<PlatformRecord> = res.take(0)?;
        Ok(platforms)
    }

    pub async fn list_platforms(db: &Surreal<Any>) -> Result<Vec<PlatformRecord>> {
        let mut res = db
            .query("SELECT * FROM platform ORDER BY issuer ASC")
            .await?;

        let platforms: Vec<PlatformRecord> = res.take(0)?;
        Ok(platforms)
    }

    /// Flip the active flag on a registration.
    ///
    /// Returns the updated record, or `None` when the pair is unknown.
    pub async fn set_platform_active(
        db: &Surreal<Any>,
        issuer: &Issuer,
        client_id: &ClientId,
        active: bool,
    ) -> Result<Option<PlatformRecord>> {
        let mut res = db
            .query(
                r#"
                UPDATE platform SET
                    is_active = $active,
                    updated_at = time::now()
                WHERE issuer = $issuer AND client_id = $client_id
                "#,
            )
            .bind(("issuer", issuer.clone()))
            .bind(("client_id", client_id.clone()))
            .bind(("active", active))
            .await?;

        let updated: Vec<PlatformRecord> = res.take(0)?;
        Ok(updated.into_iter().next())
    }

    /// Persist a fresh login initiation.
    pub async fn create_launch_state(
        db: &Surreal<Any>,
        data: &LaunchStateCreate,
    ) -> Result<LaunchStateRecord> {
        let mut res = db
            .query(
                r#"
                CREATE launch_state SET
                    state = $state,
                    nonce = $nonce,
                    issuer = $issuer,
                    client_id = $client_id,
                    target_link_uri = $target_link_uri,
                    message_hint = $message_hint,
                    deployment_hint = $deployment_hint,
                    expires_at = $expires_at
                "#,
            )
            .bind(("state", data.state.clone()))
            .bind(("nonce", data.nonce.clone()))
            .bind(("issuer", data.issuer.clone()))
            .bind(("client_id", data.client_id.clone()))
            .bind(("target_link_uri", data.target_link_uri.clone()))
            .bind(("message_hint", data.message_hint.clone()))
            .bind(("deployment_hint", data.deployment_hint.clone()))
            .bind(("expires_at", data.expires_at.clone()))
            .await?;

        let created: Option<LaunchStateRecord> = res.take(0)?;
        created.ok_or_else(|| anyhow!("failed to create launch state record"))
    }

    /// Atomically redeem a state token.
    ///
    /// The delete-and-return runs as one statement, so when two requests
    /// race on the same state exactly one of them gets the record back.
    /// Expired states are never returned.
    pub async fn redeem_launch_state(
        db: &Surreal<Any>,
        state: &StateToken,
    ) -> Result<Option<LaunchStateRecord>> {
        let mut res = db
            .query(
                r#"
                DELETE launch_state
                WHERE state = $state AND expires_at > time::now()
                RETURN BEFORE
                "#,
            )
            .bind(("state", state.clone()))
            .await?;

        let redeemed: Vec<LaunchStateRecord> = res.take(0)?;
        Ok(redeemed.into_iter().next())
    }

    /// Record a nonce as used.
    ///
    /// Returns `false` when the (issuer, nonce) pair was already consumed;
    /// the unique index makes the insert race-free.
    pub async fn consume_nonce(
        db: &Surreal<Any>,
        issuer: &Issuer,
        value: &Nonce,
        expires_at: Datetime,
    ) -> Result<bool> {
        let mut res = db
            .query(
                r#"
                CREATE nonce SET
                    issuer = $issuer,
                    value = $value,
                    expires_at = $expires_at
                "#,
            )
            .bind(("issuer", issuer.clone()))
            .bind(("value", value.clone()))
            .bind(("expires_at", expires_at))
            .await?;

        match res.take::<Option<NonceRecord>>(0) {
            Ok(_) => Ok(true),
            Err(e) if is_duplicate_error(&e.to_string()) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Drop launch states and nonces past their expiry.
    ///
    /// Called opportunistically from login initiation; correctness never
    /// depends on it since reads filter on `expires_at` themselves.
    pub async fn purge_expired(db: &Surreal<Any>) -> Result<()> {
        db.query("DELETE launch_state WHERE expires_at < time::now()")
            .await?;
        db.query("DELETE nonce WHERE expires_at < time::now()")
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_connection;
    use chrono::{Duration, Utc};

    fn sample_platform() -> PlatformCreate {
        PlatformCreate {
            issuer: Issuer::new("https://lms.example.edu"),
            client_id: ClientId::new("client-1"),
            name: "Example LMS".to_string(),
            authentication_endpoint: "https://lms.example.edu/auth".to_string(),
            accesstoken_endpoint: "https://lms.example.edu/token".to_string(),
            auth_config: AuthConfig {
                method: AuthMethod::JwkSet,
                key: "https://lms.example.edu/jwks".to_string(),
            },
            deployment_ids: vec![],
            is_active: true,
        }
    }

    fn sample_state(token: &str) -> LaunchStateCreate {
        LaunchStateCreate {
            state: StateToken::new(token),
            nonce: Nonce::new(format!("nonce-{}", token)),
            issuer: Issuer::new("https://lms.example.edu"),
            client_id: ClientId::new("client-1"),
            target_link_uri: None,
            message_hint: None,
            deployment_hint: None,
            expires_at: Datetime::from(Utc::now() + Duration::seconds(600)),
        }
    }

    #[tokio::test]
    async fn test_create_platform_then_duplicate() {
        let db = test_connection().await;
        let data = sample_platform();

        let first = QueryBuilder::create_platform(&db, &data).await.unwrap();
        assert!(first.is_some());

        let second = QueryBuilder::create_platform(&db, &data).await.unwrap();
        assert!(second.is_none());

        let all = QueryBuilder::list_platforms(&db).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_find_platform_roundtrip() {
        let db = test_connection().await;
        let data = sample_platform();
        QueryBuilder::create_platform(&db, &data).await.unwrap();

        let found = QueryBuilder::find_platform(&db, &data.issuer, &data.client_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.issuer, data.issuer);
        assert_eq!(found.client_id, data.client_id);
        assert!(found.is_active);

        let missing =
            QueryBuilder::find_platform(&db, &Issuer::new("https://other.example"), &data.client_id)
                .await
                .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_update_platform_replaces_fields() {
        let db = test_connection().await;
        let mut data = sample_platform();
        QueryBuilder::create_platform(&db, &data).await.unwrap();

        data.name = "Renamed LMS".to_string();
        data.deployment_ids = vec![crate::types::DeploymentId::new("1")];
        let updated = QueryBuilder::update_platform(&db, &data)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.name, "Renamed LMS");
        assert_eq!(updated.deployment_ids.len(), 1);

        let all = QueryBuilder::list_platforms(&db).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_set_platform_active() {
        let db = test_connection().await;
        let data = sample_platform();
        QueryBuilder::create_platform(&db, &data).await.unwrap();

        let updated =
            QueryBuilder::set_platform_active(&db, &data.issuer, &data.client_id, false)
                .await
                .unwrap()
                .unwrap();
        assert!(!updated.is_active);

        let missing = QueryBuilder::set_platform_active(
            &db,
            &Issuer::new("https://other.example"),
            &data.client_id,
            true,
        )
        .await
        .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_redeem_launch_state_single_use() {
        let db = test_connection().await;
        let data = sample_state("state-1");
        QueryBuilder::create_launch_state(&db, &data).await.unwrap();

        let first = QueryBuilder::redeem_launch_state(&db, &data.state)
            .await
            .unwrap();
        assert!(first.is_some());
        assert_eq!(first.unwrap().nonce, data.nonce);

        let second = QueryBuilder::redeem_launch_state(&db, &data.state)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_redeem_expired_state_misses() {
        let db = test_connection().await;
        let mut data = sample_state("state-2");
        data.expires_at = Datetime::from(Utc::now() - Duration::seconds(1));
        QueryBuilder::create_launch_state(&db, &data).await.unwrap();

        let redeemed = QueryBuilder::redeem_launch_state(&db, &data.state)
            .await
            .unwrap();
        assert!(redeemed.is_none());
    }

    #[tokio::test]
    async fn test_consume_nonce_once() {
        let db = test_connection().await;
        let issuer = Issuer::new("https://lms.example.edu");
        let nonce = Nonce::new("n-1");
        let expires = Datetime::from(Utc::now() + Duration::seconds(600));

        let first = QueryBuilder::consume_nonce(&db, &issuer, &nonce, expires.clone())
            .await
            .unwrap();
        assert!(first);

        let second = QueryBuilder::consume_nonce(&db, &issuer, &nonce, expires)
            .await
            .unwrap();
        assert!(!second);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = test_connection().await;
        let mut stale = sample_state("stale");
        stale.expires_at = Datetime::from(Utc::now() - Duration::seconds(10));
        QueryBuilder::create_launch_state(&db, &stale).await.unwrap();
        let fresh = sample_state("fresh");
        QueryBuilder::create_launch_state(&db, &fresh).await.unwrap();

        QueryBuilder::purge_expired(&db).await.unwrap();

        let gone = QueryBuilder::redeem_launch_state(&db, &stale.state)
            .await
            .unwrap();
        assert!(gone.is_none());
        let kept = QueryBuilder::redeem_launch_state(&db, &fresh.state)
            .await
            .unwrap();
        assert!(kept.is_some());
    }
}

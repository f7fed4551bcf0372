//! Platform registry.
//!
//! An async facade over the platform table. Identity uniqueness is the
//! storage index's job; this layer translates storage outcomes into the
//! protocol error taxonomy. Platforms are never deleted, only
//! deactivated.

use tracing::info;

use crate::db::schema::{PlatformCreate, PlatformRecord};
use crate::db::{Db, QueryBuilder};
use crate::error::{LtiError, LtiResult};
use crate::types::{ClientId, Issuer};

#[derive(Clone)]
pub struct PlatformRegistry {
    db: Db,
}

impl PlatformRegistry {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Register a new platform.
    ///
    /// Fails with `AlreadyRegistered` when the (issuer, client id) pair
    /// exists; use `re_register` to replace an existing registration.
    pub async fn register(&self, data: PlatformCreate) -> LtiResult<PlatformRecord> {
        let created = QueryBuilder::create_platform(&self.db, &data)
            .await
            .map_err(|e| LtiError::Database(e.to_string()))?;

        match created {
            Some(record) => {
                info!(
                    issuer = %record.issuer,
                    client_id = %record.client_id,
                    "Platform registered"
                );
                Ok(record)
            }
            None => Err(LtiError::AlreadyRegistered {
                issuer: data.issuer.into_inner(),
                client_id: data.client_id.into_inner(),
            }),
        }
    }

    /// Replace an existing registration with new data.
    ///
    /// Fails with `PlatformNotFound` when the pair is unknown.
    pub async fn re_register(&self, data: PlatformCreate) -> LtiResult<PlatformRecord> {
        let updated = QueryBuilder::update_platform(&self.db, &data)
            .await
            .map_err(|e| LtiError::Database(e.to_string()))?;

        match updated {
            Some(record) => {
                info!(
                    issuer = %record.issuer,
                    client_id = %record.client_id,
                    "Platform re-registered"
                );
                Ok(record)
            }
            None => Err(LtiError::PlatformNotFound(data.issuer.into_inner())),
        }
    }

    pub async fn find(
        &self,
        issuer: &Issuer,
        client_id: &ClientId,
    ) -> LtiResult<Option<PlatformRecord>> {
        QueryBuilder::find_platform(&self.db, issuer, client_id)
            .await
            .map_err(|e| LtiError::Database(e.to_string()))
    }

    pub async fn find_by_issuer(&self, issuer: &Issuer) -> LtiResult<Vec<PlatformRecord>> {
        QueryBuilder::find_platforms_by_issuer(&self.db, issuer)
            .await
            .map_err(|e| LtiError::Database(e.to_string()))
    }

    pub async fn list(&self) -> LtiResult<Vec<PlatformRecord>> {
        QueryBuilder::list_platforms(&self.db)
            .await
            .map_err(|e| LtiError::Database(e.to_string()))
    }

    pub async fn activate(
        &self,
        issuer: &Issuer,
        client_id: &ClientId,
    ) -> LtiResult<PlatformRecord> {
        self.set_active(issuer, client_id, true).await
    }

    pub async fn deactivate(
        &self,
        issuer: &Issuer,
        client_id: &ClientId,
    ) -> LtiResult<PlatformRecord> {
        self.set_active(issuer, client_id, false).await
    }

    async fn set_active(
        &self,
        issuer: &Issuer,
        client_id: &ClientId,
        active: bool,
    ) -> LtiResult<PlatformRecord> {
        let updated = QueryBuilder::set_platform_active(&self.db, issuer, client_id, active)
            .await
            .map_err(|e| LtiError::Database(e.to_string()))?;

        match updated {
            Some(record) => {
                info!(
                    issuer = %record.issuer,
                    client_id = %record.client_id,
                    active,
                    "Platform active flag changed"
                );
                Ok(record)
            }
            None => Err(LtiError::PlatformNotFound(issuer.to_string())),
        }
    }
}

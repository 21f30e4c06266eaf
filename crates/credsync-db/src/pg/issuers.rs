use async_trait::async_trait;
use credsync_core::{IssuerDirectory, IssuerId, IssuerProfile, StoreResult};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::PgStore;
use crate::error::store_error;

#[derive(Debug, Clone, FromRow)]
pub struct IssuerRow {
    pub id: Uuid,
    pub name: String,
    pub provider: String,
    pub registry_id: Option<String>,
    pub accept_external: bool,
    pub jwks_url: Option<String>,
}

impl IssuerRow {
    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT id, name, provider, registry_id, accept_external, jwks_url
            FROM external_issuers WHERE id = $1
            ",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_registry_id(
        pool: &PgPool,
        provider: &str,
        registry_id: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT id, name, provider, registry_id, accept_external, jwks_url
            FROM external_issuers
            WHERE lower(provider) = lower($1) AND registry_id = $2
            ",
        )
        .bind(provider)
        .bind(registry_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn list_accepting(pool: &PgPool) -> Result<Vec<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT id, name, provider, registry_id, accept_external, jwks_url
            FROM external_issuers
            WHERE accept_external = TRUE
            ORDER BY name ASC
            ",
        )
        .fetch_all(pool)
        .await
    }
}

impl From<IssuerRow> for IssuerProfile {
    fn from(row: IssuerRow) -> Self {
        Self {
            id: IssuerId::from_uuid(row.id),
            name: row.name,
            provider: row.provider,
            registry_id: row.registry_id,
            accept_external: row.accept_external,
            jwks_url: row.jwks_url,
        }
    }
}

#[async_trait]
impl IssuerDirectory for PgStore {
    async fn get_issuer(&self, id: IssuerId) -> StoreResult<Option<IssuerProfile>> {
        Ok(IssuerRow::find_by_id(self.pool(), id.into_uuid())
            .await
            .map_err(store_error)?
            .map(Into::into))
    }

    async fn find_by_registry_id(
        &self,
        provider: &str,
        registry_id: &str,
    ) -> StoreResult<Option<IssuerProfile>> {
        Ok(IssuerRow::find_by_registry_id(self.pool(), provider, registry_id)
            .await
            .map_err(store_error)?
            .map(Into::into))
    }

    async fn list_external_issuers(&self) -> StoreResult<Vec<IssuerProfile>> {
        Ok(IssuerRow::list_accepting(self.pool())
            .await
            .map_err(store_error)?
            .into_iter()
            .map(Into::into)
            .collect())
    }
}

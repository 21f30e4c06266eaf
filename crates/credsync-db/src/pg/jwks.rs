use async_trait::async_trait;
use chrono::{DateTime, Utc};
use credsync_core::{JwksSnapshot, JwksSnapshotStore, StoreResult};
use sqlx::{FromRow, PgPool};

use super::PgStore;
use crate::error::store_error;

#[derive(Debug, Clone, FromRow)]
struct JwksSnapshotRow {
    jwks_url: String,
    jwks: serde_json::Value,
    fetched_at: DateTime<Utc>,
}

impl JwksSnapshotRow {
    async fn find(pool: &PgPool, url: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as(
            r"
            SELECT jwks_url, jwks, fetched_at FROM issuer_jwks_snapshots WHERE jwks_url = $1
            ",
        )
        .bind(url)
        .fetch_optional(pool)
        .await
    }

    async fn upsert(pool: &PgPool, snapshot: &JwksSnapshot) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO issuer_jwks_snapshots (jwks_url, jwks, fetched_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (jwks_url) DO UPDATE SET
                jwks = EXCLUDED.jwks,
                fetched_at = EXCLUDED.fetched_at
            ",
        )
        .bind(&snapshot.jwks_url)
        .bind(&snapshot.jwks)
        .bind(snapshot.fetched_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JwksSnapshotStore for PgStore {
    async fn load_snapshot(&self, jwks_url: &str) -> StoreResult<Option<JwksSnapshot>> {
        Ok(JwksSnapshotRow::find(self.pool(), jwks_url)
            .await
            .map_err(store_error)?
            .map(|row| JwksSnapshot {
                jwks_url: row.jwks_url,
                jwks: row.jwks,
                fetched_at: row.fetched_at,
            }))
    }

    async fn save_snapshot(&self, snapshot: &JwksSnapshot) -> StoreResult<()> {
        JwksSnapshotRow::upsert(self.pool(), snapshot)
            .await
            .map_err(store_error)
    }
}

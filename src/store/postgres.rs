use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::debug;
use uuid::Uuid;

use crate::types::{
    Account, AccountId, EvaluationRequest, HostRecord, HostUpsert, InventoryId, OrgId,
};

use super::checkpoint::{CheckpointKey, format_checkpoint};
use super::{CheckpointStore, HostStore, Result, StoreError, parse_stored};

/// Attempts at resolving an account row when the insert races a delete.
const ACCOUNT_ATTEMPTS: usize = 3;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS timestamp_kv (
                name  TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS account (
                id     SERIAL PRIMARY KEY,
                org_id TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS host (
                id                      BIGSERIAL PRIMARY KEY,
                inventory_id            UUID NOT NULL UNIQUE,
                account_id              INTEGER NOT NULL REFERENCES account (id),
                checksum                TEXT NOT NULL,
                opt_out                 BOOLEAN NOT NULL DEFAULT FALSE,
                stale_timestamp         TIMESTAMPTZ NULL,
                stale_warning_timestamp TIMESTAMPTZ NULL,
                culled_timestamp        TIMESTAMPTZ NULL,
                last_upload             TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS repo (
                id   BIGSERIAL PRIMARY KEY,
                name TEXT NOT NULL UNIQUE
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS host_repo (
                host_id BIGINT NOT NULL REFERENCES host (id) ON DELETE CASCADE,
                repo_id BIGINT NOT NULL REFERENCES repo (id) ON DELETE CASCADE,
                PRIMARY KEY (host_id, repo_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        // Affected-host lookups start from the repository side.
        sqlx::query("CREATE INDEX IF NOT EXISTS host_repo_repo_id_idx ON host_repo (repo_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for PgStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_timestamp(&self, key: CheckpointKey) -> Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT value FROM timestamp_kv WHERE name = $1")
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let value: String = row.try_get("value")?;
                parse_stored(key, value).map(Some)
            }
            None => Ok(None),
        }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn set_timestamp(&self, key: CheckpointKey, ts: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO timestamp_kv (name, value)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET value = EXCLUDED.value
            "#,
        )
        .bind(key.as_str())
        .bind(format_checkpoint(&ts))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl HostStore for PgStore {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn get_or_create_account(&self, org_id: &OrgId) -> Result<Account> {
        for _ in 0..ACCOUNT_ATTEMPTS {
            let inserted = sqlx::query(
                r#"
                INSERT INTO account (org_id) VALUES ($1)
                ON CONFLICT (org_id) DO NOTHING
                RETURNING id
                "#,
            )
            .bind(org_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

            let row = match inserted {
                Some(row) => Some(row),
                // Another writer created it first.
                None => {
                    sqlx::query("SELECT id FROM account WHERE org_id = $1")
                        .bind(org_id.as_str())
                        .fetch_optional(&self.pool)
                        .await?
                }
            };

            if let Some(row) = row {
                let id: i32 = row.try_get("id")?;
                return Ok(Account {
                    id: AccountId(id),
                    org_id: org_id.clone(),
                });
            }
            debug!(%org_id, "Account vanished between insert and lookup, retrying");
        }
        Err(StoreError::AccountUnresolved(org_id.clone()))
    }

    #[tracing::instrument(level = "debug", skip(self, host), fields(inventory_id = %host.inventory_id))]
    async fn upsert_host(&self, account_id: AccountId, host: &HostUpsert) -> Result<HostRecord> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO host
                (inventory_id, account_id, checksum, opt_out,
                 stale_timestamp, stale_warning_timestamp, culled_timestamp, last_upload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, now())
            ON CONFLICT (inventory_id) DO UPDATE SET
                account_id              = EXCLUDED.account_id,
                checksum                = EXCLUDED.checksum,
                opt_out                 = EXCLUDED.opt_out,
                stale_timestamp         = EXCLUDED.stale_timestamp,
                stale_warning_timestamp = EXCLUDED.stale_warning_timestamp,
                culled_timestamp        = EXCLUDED.culled_timestamp,
                last_upload             = EXCLUDED.last_upload
            RETURNING id, last_upload
            "#,
        )
        .bind(host.inventory_id.0)
        .bind(account_id.0)
        .bind(&host.checksum)
        .bind(host.opt_out)
        .bind(host.stale_timestamp)
        .bind(host.stale_warning_timestamp)
        .bind(host.culled_timestamp)
        .fetch_one(&mut *tx)
        .await?;

        let id: i64 = row.try_get("id")?;
        let last_upload: DateTime<Utc> = row.try_get("last_upload")?;

        sqlx::query(
            r#"
            INSERT INTO repo (name)
            SELECT UNNEST($1::text[])
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(&host.repos)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM host_repo WHERE host_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO host_repo (host_id, repo_id)
            SELECT $1, id FROM repo WHERE name = ANY($2)
            "#,
        )
        .bind(id)
        .bind(&host.repos)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(HostRecord {
            id,
            inventory_id: host.inventory_id,
            account_id,
            checksum: host.checksum.clone(),
            opt_out: host.opt_out,
            stale_timestamp: host.stale_timestamp,
            stale_warning_timestamp: host.stale_warning_timestamp,
            culled_timestamp: host.culled_timestamp,
            last_upload,
        })
    }

    #[tracing::instrument(level = "debug", skip_all, fields(repos = repos.len()))]
    async fn hosts_for_repos(&self, repos: &BTreeSet<String>) -> Result<Vec<EvaluationRequest>> {
        let names: Vec<&str> = repos.iter().map(String::as_str).collect();
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT h.inventory_id, h.account_id, a.org_id
              FROM host_repo hr
              JOIN repo r    ON r.id = hr.repo_id
              JOIN host h    ON h.id = hr.host_id
              JOIN account a ON a.id = h.account_id
             WHERE r.name = ANY($1)
             ORDER BY h.account_id, h.inventory_id
            "#,
        )
        .bind(&names)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let inventory_id: Uuid = row.try_get("inventory_id")?;
                let account_id: i32 = row.try_get("account_id")?;
                let org_id: String = row.try_get("org_id")?;
                Ok(EvaluationRequest::new(
                    InventoryId(inventory_id),
                    AccountId(account_id),
                    OrgId(org_id),
                ))
            })
            .collect()
    }
}

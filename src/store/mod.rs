//! Persistent state: sync checkpoints, accounts, hosts and their repositories.
//!
//! Two implementations share the [`CheckpointStore`] and [`HostStore`] traits:
//!
//! - [`postgres::PgStore`] for production
//! - [`memory::MemoryStore`] for tests and runs without a database
//!
//! Both resolve concurrent writers atomically. Account creation converges on
//! one row per organization and host writes are upserts keyed by inventory ID.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{Account, AccountId, EvaluationRequest, HostRecord, HostUpsert, OrgId};

pub mod checkpoint;
pub mod memory;
pub mod postgres;

pub use checkpoint::CheckpointKey;
pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors from the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    /// A stored checkpoint value is not a timestamp.
    #[error("invalid stored timestamp for {key}: {value:?}")]
    InvalidCheckpoint { key: CheckpointKey, value: String },

    /// Neither the insert nor the follow-up lookup produced an account row.
    #[error("could not resolve account for org {0}")]
    AccountUnresolved(OrgId),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Named timestamp cursors, one per sync type.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Returns the stored timestamp, or `None` if the key was never written.
    async fn get_timestamp(&self, key: CheckpointKey) -> Result<Option<DateTime<Utc>>>;

    /// Writes a timestamp, replacing any previous value.
    async fn set_timestamp(&self, key: CheckpointKey, ts: DateTime<Utc>) -> Result<()>;

    /// Every stored checkpoint, in key order.
    async fn all_timestamps(&self) -> Result<Vec<(CheckpointKey, DateTime<Utc>)>> {
        let mut out = Vec::new();
        for key in CheckpointKey::ALL {
            if let Some(ts) = self.get_timestamp(key).await? {
                out.push((key, ts));
            }
        }
        Ok(out)
    }
}

/// Accounts, hosts and the host-to-repository relation.
#[async_trait]
pub trait HostStore: Send + Sync {
    /// Looks up the account for `org_id`, creating it on first sight.
    async fn get_or_create_account(&self, org_id: &OrgId) -> Result<Account>;

    /// Creates or updates the host keyed by inventory ID under `account_id`,
    /// replacing its repository set.
    async fn upsert_host(&self, account_id: AccountId, host: &HostUpsert) -> Result<HostRecord>;

    /// Distinct hosts associated with any of `repos`, ordered by account.
    async fn hosts_for_repos(&self, repos: &BTreeSet<String>) -> Result<Vec<EvaluationRequest>>;
}

pub(crate) fn parse_stored(key: CheckpointKey, value: String) -> Result<DateTime<Utc>> {
    checkpoint::parse_checkpoint(&value).map_err(|_| StoreError::InvalidCheckpoint { key, value })
}

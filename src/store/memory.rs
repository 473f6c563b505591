//! In-memory store for tests and local runs.
//!
//! Semantics match [`super::PgStore`]: checkpoints are kept in their stored
//! string form, accounts are unique per organization, and host writes replace
//! the previous row for the same inventory ID in a single critical section.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::types::{
    Account, AccountId, EvaluationRequest, HostRecord, HostUpsert, InventoryId, OrgId,
};

use super::checkpoint::{CheckpointKey, format_checkpoint};
use super::{CheckpointStore, HostStore, Result, parse_stored};

#[derive(Default)]
struct Inner {
    checkpoints: BTreeMap<CheckpointKey, String>,
    accounts: BTreeMap<OrgId, AccountId>,
    orgs: HashMap<AccountId, OrgId>,
    hosts: HashMap<InventoryId, HostRecord>,
    host_repos: HashMap<InventoryId, BTreeSet<String>>,
    next_account_id: i32,
    next_host_id: i64,
}

/// Store backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    repo_queries: Arc<AtomicUsize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of accounts created so far.
    pub async fn account_count(&self) -> usize {
        self.inner.lock().await.accounts.len()
    }

    /// Number of stored hosts.
    pub async fn host_count(&self) -> usize {
        self.inner.lock().await.hosts.len()
    }

    pub async fn host(&self, inventory_id: &InventoryId) -> Option<HostRecord> {
        self.inner.lock().await.hosts.get(inventory_id).cloned()
    }

    pub async fn host_repos(&self, inventory_id: &InventoryId) -> BTreeSet<String> {
        self.inner
            .lock()
            .await
            .host_repos
            .get(inventory_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of affected-host lookups served.
    pub fn repo_query_count(&self) -> usize {
        self.repo_queries.load(Ordering::SeqCst)
    }

    /// Overwrites a raw checkpoint value, bypassing formatting.
    pub async fn set_raw_checkpoint(&self, key: CheckpointKey, value: impl Into<String>) {
        self.inner.lock().await.checkpoints.insert(key, value.into());
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn get_timestamp(&self, key: CheckpointKey) -> Result<Option<DateTime<Utc>>> {
        let value = self.inner.lock().await.checkpoints.get(&key).cloned();
        value.map(|v| parse_stored(key, v)).transpose()
    }

    async fn set_timestamp(&self, key: CheckpointKey, ts: DateTime<Utc>) -> Result<()> {
        self.inner
            .lock()
            .await
            .checkpoints
            .insert(key, format_checkpoint(&ts));
        Ok(())
    }
}

#[async_trait]
impl HostStore for MemoryStore {
    async fn get_or_create_account(&self, org_id: &OrgId) -> Result<Account> {
        let mut inner = self.inner.lock().await;
        if let Some(id) = inner.accounts.get(org_id) {
            return Ok(Account {
                id: *id,
                org_id: org_id.clone(),
            });
        }

        inner.next_account_id += 1;
        let id = AccountId(inner.next_account_id);
        inner.accounts.insert(org_id.clone(), id);
        inner.orgs.insert(id, org_id.clone());
        Ok(Account {
            id,
            org_id: org_id.clone(),
        })
    }

    async fn upsert_host(&self, account_id: AccountId, host: &HostUpsert) -> Result<HostRecord> {
        let mut inner = self.inner.lock().await;
        let id = match inner.hosts.get(&host.inventory_id) {
            Some(existing) => existing.id,
            None => {
                inner.next_host_id += 1;
                inner.next_host_id
            }
        };

        let record = HostRecord {
            id,
            inventory_id: host.inventory_id,
            account_id,
            checksum: host.checksum.clone(),
            opt_out: host.opt_out,
            stale_timestamp: host.stale_timestamp,
            stale_warning_timestamp: host.stale_warning_timestamp,
            culled_timestamp: host.culled_timestamp,
            last_upload: Utc::now(),
        };
        inner.hosts.insert(host.inventory_id, record.clone());
        inner
            .host_repos
            .insert(host.inventory_id, host.repos.iter().cloned().collect());
        Ok(record)
    }

    async fn hosts_for_repos(&self, repos: &BTreeSet<String>) -> Result<Vec<EvaluationRequest>> {
        self.repo_queries.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().await;

        let mut out: Vec<EvaluationRequest> = inner
            .host_repos
            .iter()
            .filter(|(_, host_repos)| !host_repos.is_disjoint(repos))
            .filter_map(|(inventory_id, _)| {
                let host = inner.hosts.get(inventory_id)?;
                let org_id = inner.orgs.get(&host.account_id)?;
                Some(EvaluationRequest::new(
                    host.inventory_id,
                    host.account_id,
                    org_id.clone(),
                ))
            })
            .collect();
        out.sort_by(|a, b| {
            (a.account_id, a.inventory_id).cmp(&(b.account_id, b.inventory_id))
        });
        Ok(out)
    }
}

//! Shared test fixtures: a scripted metadata feed and host builders.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;
use uuid::Uuid;

use crate::feed::{
    DbChange, FeedApi, FeedError, FeedResult, RepoAttributes, ReposRequest, ReposResponse,
};
use crate::retry::RetryError;
use crate::types::{HostUpsert, InventoryId};

/// One repository known to [`FakeFeed`].
#[derive(Debug, Clone)]
struct CatalogEntry {
    third_party: bool,
    changed: DateTime<Utc>,
}

#[derive(Default)]
struct FakeState {
    catalog: BTreeMap<String, CatalogEntry>,
    exported: Option<DateTime<Utc>>,
    fail_on_page: Option<u32>,
    omit_latest_from_page: Option<u32>,
    requests: Vec<ReposRequest>,
    db_change_calls: usize,
}

/// In-memory metadata feed.
///
/// Repositories are listed in name order. `modified_since` filters inclusively
/// at full precision, and each page reports the latest change among the
/// repositories on that page.
#[derive(Clone, Default)]
pub struct FakeFeed {
    state: Arc<Mutex<FakeState>>,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_repo(&self, name: &str, third_party: bool, changed: DateTime<Utc>) {
        self.state.lock().unwrap().catalog.insert(
            name.to_string(),
            CatalogEntry {
                third_party,
                changed,
            },
        );
    }

    pub fn set_exported(&self, exported: DateTime<Utc>) {
        self.state.lock().unwrap().exported = Some(exported);
    }

    /// Requests for `page` fail with a terminal 500.
    pub fn fail_on_page(&self, page: Option<u32>) {
        self.state.lock().unwrap().fail_on_page = page;
    }

    /// Pages from `page` on report no latest change.
    pub fn omit_latest_from_page(&self, page: u32) {
        self.state.lock().unwrap().omit_latest_from_page = Some(page);
    }

    pub fn requests(&self) -> Vec<ReposRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    pub fn db_change_calls(&self) -> usize {
        self.state.lock().unwrap().db_change_calls
    }
}

#[async_trait]
impl FeedApi for FakeFeed {
    async fn repos_page(&self, request: &ReposRequest) -> FeedResult<ReposResponse> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());

        if state.fail_on_page == Some(request.page) {
            return Err(RetryError::Terminal {
                attempts: 1,
                status_code: Some(500),
                source: FeedError::status(500, b"feed unavailable"),
            });
        }

        let matching: Vec<(&String, &CatalogEntry)> = state
            .catalog
            .iter()
            .filter(|(_, entry)| {
                request
                    .modified_since
                    .is_none_or(|since| entry.changed >= since)
            })
            .collect();

        let page_size = request.page_size.max(1) as usize;
        let pages = matching.len().div_ceil(page_size) as u32;
        let start = (request.page.saturating_sub(1) as usize) * page_size;
        let on_page: Vec<_> = matching.iter().skip(start).take(page_size).collect();

        let latest = on_page.iter().map(|(_, entry)| entry.changed).max();
        let latest_repo_change = match state.omit_latest_from_page {
            Some(from) if request.page >= from => None,
            _ => latest,
        };

        let repository_list = on_page
            .iter()
            .map(|(name, entry)| {
                let attrs = RepoAttributes {
                    third_party: Some(entry.third_party),
                    extra: serde_json::Map::new(),
                };
                (name.to_string(), vec![attrs])
            })
            .collect();

        Ok(ReposResponse {
            page: request.page,
            page_size: request.page_size,
            pages,
            repository_list,
            latest_repo_change,
        })
    }

    async fn db_change(&self) -> FeedResult<DbChange> {
        let mut state = self.state.lock().unwrap();
        state.db_change_calls += 1;
        let exported = state
            .exported
            .unwrap_or_else(|| Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        Ok(DbChange {
            exported,
            last_change: None,
        })
    }
}

pub fn ts(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
}

pub fn inventory_id(n: u128) -> InventoryId {
    InventoryId(Uuid::from_u128(n))
}

pub fn host_upsert(n: u128, repos: &[&str]) -> HostUpsert {
    HostUpsert {
        inventory_id: inventory_id(n),
        checksum: format!("checksum-{n}"),
        opt_out: false,
        stale_timestamp: None,
        stale_warning_timestamp: None,
        culled_timestamp: None,
        repos: repos.iter().map(|r| r.to_string()).collect(),
    }
}

pub fn arb_repo_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,12}".prop_map(String::from)
}

/// Repository catalogs: name, third-party flag, change offset in seconds.
pub fn arb_catalog() -> impl Strategy<Value = BTreeMap<String, (bool, u32)>> {
    prop::collection::btree_map(arb_repo_name(), (any::<bool>(), 0u32..86_400), 0..40)
}

//! Accounts, host records and evaluation requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{AccountId, InventoryId, OrgId};

/// An account row. Created at most once per organization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub org_id: OrgId,
}

/// Host state as written by an upload.
///
/// Timestamps that failed to parse upstream are already `None` here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostUpsert {
    pub inventory_id: InventoryId,
    pub checksum: String,
    pub opt_out: bool,
    pub stale_timestamp: Option<DateTime<Utc>>,
    pub stale_warning_timestamp: Option<DateTime<Utc>>,
    pub culled_timestamp: Option<DateTime<Utc>>,
    /// Enabled repository names; replaces the host's previous set.
    pub repos: Vec<String>,
}

/// A stored host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRecord {
    /// Surrogate key, stable across account reassignment.
    pub id: i64,
    pub inventory_id: InventoryId,
    pub account_id: AccountId,
    pub checksum: String,
    pub opt_out: bool,
    pub stale_timestamp: Option<DateTime<Utc>>,
    pub stale_warning_timestamp: Option<DateTime<Utc>>,
    pub culled_timestamp: Option<DateTime<Utc>>,
    pub last_upload: DateTime<Utc>,
}

/// A unit of work asking downstream evaluators to recompute one host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub inventory_id: InventoryId,
    pub account_id: AccountId,
    pub org_id: OrgId,
}

impl EvaluationRequest {
    pub fn new(inventory_id: InventoryId, account_id: AccountId, org_id: OrgId) -> Self {
        EvaluationRequest {
            inventory_id,
            account_id,
            org_id,
        }
    }
}

//! Newtype wrappers for domain identifiers.
//!
//! These keep inventory IDs, surrogate account keys and organization IDs from
//! being mixed up at call sites that take several of them at once.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Inventory ID of a managed host, as assigned by the host inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryId(pub Uuid);

impl InventoryId {
    pub fn new(id: Uuid) -> Self {
        InventoryId(id)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for InventoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for InventoryId {
    fn from(id: Uuid) -> Self {
        InventoryId(id)
    }
}

/// Surrogate key of an account row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub i32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for AccountId {
    fn from(n: i32) -> Self {
        AccountId(n)
    }
}

/// Organization ID, the natural key of an account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrgId(pub String);

impl OrgId {
    pub fn new(s: impl Into<String>) -> Self {
        OrgId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrgId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for OrgId {
    fn from(s: &str) -> Self {
        OrgId(s.to_string())
    }
}

impl From<String> for OrgId {
    fn from(s: String) -> Self {
        OrgId(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn inventory_id_serializes_as_plain_uuid() {
        let id = InventoryId(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }

    #[test]
    fn org_id_display_is_raw_value() {
        assert_eq!(OrgId::from("org-123").to_string(), "org-123");
    }

    proptest! {
        #[test]
        fn account_id_ordering_matches_inner(a: i32, b: i32) {
            prop_assert_eq!(AccountId(a).cmp(&AccountId(b)), a.cmp(&b));
        }
    }
}

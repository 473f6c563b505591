//! Core domain types shared by the sync and upload paths.

pub mod host;
pub mod ids;

pub use host::{Account, EvaluationRequest, HostRecord, HostUpsert};
pub use ids::{AccountId, InventoryId, OrgId};

//! Inbound host-upload messages.
//!
//! The host payload is decoded leniently: the optional lifecycle timestamps
//! and the opt-out flag are kept as raw JSON, and any value of the wrong type
//! or format is logged and dropped rather than rejecting the whole message.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::types::{HostUpsert, InventoryId};

/// One message from the host-upload queue.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadEvent {
    /// Inventory event type (`created`, `updated`, ...). Informational.
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    pub host: HostPayload,
    #[serde(default)]
    pub platform_metadata: Option<PlatformMetadata>,
}

impl UploadEvent {
    pub fn inventory_id(&self) -> InventoryId {
        InventoryId(self.host.id)
    }

    /// The base64 identity header forwarded by the platform, if any.
    pub fn b64_identity(&self) -> Option<&str> {
        self.platform_metadata
            .as_ref()
            .and_then(|meta| meta.b64_identity.as_deref())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlatformMetadata {
    #[serde(default)]
    pub b64_identity: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostPayload {
    pub id: Uuid,
    #[serde(default)]
    pub stale_timestamp: Option<Value>,
    #[serde(default)]
    pub stale_warning_timestamp: Option<Value>,
    #[serde(default)]
    pub culled_timestamp: Option<Value>,
    #[serde(default)]
    pub opt_out: Option<Value>,
    #[serde(default)]
    pub system_profile: SystemProfile,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemProfile {
    #[serde(default)]
    pub installed_packages: Vec<String>,
    #[serde(default)]
    pub yum_repos: Vec<YumRepo>,
    #[serde(default)]
    pub releasever: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
}

impl SystemProfile {
    /// IDs of enabled repositories, sorted and deduplicated.
    pub fn enabled_repos(&self) -> Vec<String> {
        let mut repos: Vec<String> = self
            .yum_repos
            .iter()
            .filter(|repo| repo.enabled)
            .map(|repo| repo.id.clone())
            .collect();
        repos.sort();
        repos.dedup();
        repos
    }

    /// Hex SHA-256 of the evaluation-relevant part of the profile.
    ///
    /// Package and repository order does not affect the result.
    pub fn checksum(&self) -> String {
        let mut packages = self.installed_packages.clone();
        packages.sort();

        let canonical = CanonicalProfile {
            packages,
            repositories: self.enabled_repos(),
            releasever: self.releasever.as_deref(),
            arch: self.arch.as_deref(),
        };
        // A struct of strings always serializes.
        let bytes = serde_json::to_vec(&canonical).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct YumRepo {
    pub id: String,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Serialize)]
struct CanonicalProfile<'a> {
    packages: Vec<String>,
    repositories: Vec<String>,
    releasever: Option<&'a str>,
    arch: Option<&'a str>,
}

/// Parses an optional RFC 3339 timestamp. Values that are not strings or do
/// not parse are logged and treated as absent.
pub fn parse_optional_timestamp(field: &'static str, value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::Null => None,
        Value::String(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(err) => {
                warn!(field, value = %raw, error = %err, "Unable to parse timestamp, storing as absent");
                None
            }
        },
        other => {
            warn!(field, value = %other, "Timestamp is not a string, storing as absent");
            None
        }
    }
}

/// Reads the opt-out flag. Anything but a boolean counts as not opted out.
fn parse_opt_out(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(opt_out)) => *opt_out,
        Some(other) => {
            warn!(value = %other, "opt_out is not a boolean, storing as false");
            false
        }
    }
}

impl HostPayload {
    /// Normalized host state for the store.
    pub fn to_upsert(&self) -> HostUpsert {
        HostUpsert {
            inventory_id: InventoryId(self.id),
            checksum: self.system_profile.checksum(),
            opt_out: parse_opt_out(self.opt_out.as_ref()),
            stale_timestamp: parse_optional_timestamp(
                "stale_timestamp",
                self.stale_timestamp.as_ref(),
            ),
            stale_warning_timestamp: parse_optional_timestamp(
                "stale_warning_timestamp",
                self.stale_warning_timestamp.as_ref(),
            ),
            culled_timestamp: parse_optional_timestamp(
                "culled_timestamp",
                self.culled_timestamp.as_ref(),
            ),
            repos: self.system_profile.enabled_repos(),
        }
    }
}

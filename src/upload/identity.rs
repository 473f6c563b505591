//! Platform identity carried by upload messages.
//!
//! The identity is base64-encoded JSON. Only the fields this service needs
//! are decoded; everything else is ignored.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identity types allowed to upload host state.
pub const ACCEPTED_IDENTITY_TYPES: [&str; 2] = ["User", "System"];

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("identity is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("identity is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    #[serde(default)]
    pub identity: IdentityDetail,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entitlements: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IdentityDetail {
    #[serde(rename = "type", default)]
    pub identity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
}

impl Identity {
    /// Builds an identity of the given type for `org_id`.
    pub fn new(identity_type: impl Into<String>, org_id: impl Into<String>) -> Self {
        Identity {
            identity: IdentityDetail {
                identity_type: identity_type.into(),
                org_id: Some(org_id.into()),
                account_number: None,
            },
            entitlements: None,
        }
    }

    pub fn decode(b64: &str) -> Result<Self, IdentityError> {
        let bytes = BASE64.decode(b64.trim())?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub fn encode(&self) -> String {
        // Plain strings and JSON values always serialize.
        BASE64.encode(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn is_entitled(&self) -> bool {
        ACCEPTED_IDENTITY_TYPES.contains(&self.identity.identity_type.as_str())
    }

    /// Organization ID, if present and non-blank.
    pub fn org_id(&self) -> Option<&str> {
        self.identity
            .org_id
            .as_deref()
            .map(str::trim)
            .filter(|org| !org.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_user_identity() {
        let encoded = Identity::new("User", "org-1").encode();
        let identity = Identity::decode(&encoded).unwrap();

        assert!(identity.is_entitled());
        assert_eq!(identity.org_id(), Some("org-1"));
    }

    #[test]
    fn empty_identity_is_not_entitled() {
        let encoded = Identity::default().encode();
        let identity = Identity::decode(&encoded).unwrap();

        assert!(!identity.is_entitled());
        assert_eq!(identity.org_id(), None);
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            Identity::decode("Invalid"),
            Err(IdentityError::Base64(_)) | Err(IdentityError::Json(_))
        ));
        let not_json = BASE64.encode("not json");
        assert!(matches!(Identity::decode(&not_json), Err(IdentityError::Json(_))));
    }

    #[test]
    fn blank_org_counts_as_missing() {
        let identity = Identity::new("System", "  ");
        assert!(identity.is_entitled());
        assert_eq!(identity.org_id(), None);
    }
}

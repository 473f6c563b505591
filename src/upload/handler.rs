//! Per-message upload processing.
//!
//! ```text
//! bytes ──parse──► UploadEvent ──identity──► org ──account──► upsert ──► publish
//!   │                  │              │                          │          │
//!   ▼                  ▼              ▼                          ▼          ▼
//! InvalidPayload  MissingIdentity  NotEntitled               Store      Publish
//!                 InvalidIdentity
//! ```
//!
//! Rejections happen before any store access. The evaluation request is
//! published only after the host write has committed.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::publish::{EvalPublisher, PublishError};
use crate::store::{HostStore, StoreError};
use crate::types::{EvaluationRequest, InventoryId, OrgId};

use super::identity::Identity;
use super::message::UploadEvent;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload payload: {0}")]
    InvalidPayload(#[source] serde_json::Error),

    #[error("upload has no identity")]
    MissingIdentity,

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("identity type {0:?} is not entitled to upload")]
    NotEntitled(String),

    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("publishing evaluation request failed: {0}")]
    Publish(#[from] PublishError),
}

impl UploadError {
    /// Stable label for logs.
    pub fn reason(&self) -> &'static str {
        match self {
            UploadError::InvalidPayload(_) => "invalid_payload",
            UploadError::MissingIdentity => "missing_identity",
            UploadError::InvalidIdentity(_) => "invalid_identity",
            UploadError::NotEntitled(_) => "not_entitled",
            UploadError::Store(_) => "store_failure",
            UploadError::Publish(_) => "publish_failure",
        }
    }

    /// True when the message itself is bad and redelivery cannot help.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            UploadError::InvalidPayload(_)
                | UploadError::MissingIdentity
                | UploadError::InvalidIdentity(_)
                | UploadError::NotEntitled(_)
        )
    }
}

/// An upload that passed validation.
#[derive(Debug, Clone)]
pub struct ParsedUpload {
    pub event: UploadEvent,
    pub org_id: OrgId,
}

impl ParsedUpload {
    pub fn inventory_id(&self) -> InventoryId {
        self.event.inventory_id()
    }
}

/// Result of a processed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub host_id: i64,
    pub request: EvaluationRequest,
}

/// Decodes and validates a raw message.
pub fn parse_upload(body: &[u8]) -> Result<ParsedUpload, UploadError> {
    let event: UploadEvent = serde_json::from_slice(body).map_err(UploadError::InvalidPayload)?;
    let org_id = authenticate(&event)?;
    Ok(ParsedUpload { event, org_id })
}

/// Extracts the uploading organization from the message identity.
pub fn authenticate(event: &UploadEvent) -> Result<OrgId, UploadError> {
    let b64 = event.b64_identity().ok_or(UploadError::MissingIdentity)?;
    let identity =
        Identity::decode(b64).map_err(|err| UploadError::InvalidIdentity(err.to_string()))?;
    if !identity.is_entitled() {
        return Err(UploadError::NotEntitled(identity.identity.identity_type));
    }
    let org_id = identity
        .org_id()
        .ok_or_else(|| UploadError::InvalidIdentity("identity has no org_id".to_string()))?;
    Ok(OrgId::new(org_id))
}

pub struct UploadHandler {
    store: Arc<dyn HostStore>,
    publisher: Arc<dyn EvalPublisher>,
}

impl UploadHandler {
    pub fn new(store: Arc<dyn HostStore>, publisher: Arc<dyn EvalPublisher>) -> Self {
        UploadHandler { store, publisher }
    }

    /// Parses and processes one raw message.
    pub async fn handle_bytes(&self, body: &[u8]) -> Result<UploadOutcome, UploadError> {
        let parsed = parse_upload(body)?;
        self.process(parsed).await
    }

    /// Resolves the account, stores the host and requests its evaluation.
    #[instrument(skip_all, fields(inventory_id = %upload.inventory_id(), org_id = %upload.org_id))]
    pub async fn process(&self, upload: ParsedUpload) -> Result<UploadOutcome, UploadError> {
        let account = self.store.get_or_create_account(&upload.org_id).await?;
        let host = upload.event.host.to_upsert();
        let record = self.store.upsert_host(account.id, &host).await?;
        debug!(
            host_id = record.id,
            account_id = %account.id,
            repos = host.repos.len(),
            "Host stored"
        );

        let request = EvaluationRequest::new(record.inventory_id, account.id, account.org_id);
        self.publisher.publish(std::slice::from_ref(&request)).await?;

        Ok(UploadOutcome {
            host_id: record.id,
            request,
        })
    }
}

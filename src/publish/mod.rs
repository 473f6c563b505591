//! Evaluation-request publication.
//!
//! Every trigger (periodic sync, upload) ends here. A publisher sends one
//! message per request and reports the first failure to the caller, who
//! decides whether to retry or hold back its checkpoint.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::EvaluationRequest;

pub mod channel;
pub mod memory;

pub use channel::{ChannelPublisher, spawn_drain};
pub use memory::MemoryPublisher;

#[derive(Debug, Error)]
pub enum PublishError {
    /// The receiving side of the channel has gone away.
    #[error("evaluation channel closed")]
    Closed,

    #[error("failed to encode evaluation request: {0}")]
    Encode(#[from] serde_json::Error),

    /// The broker refused or failed the publish.
    #[error("broker publish failed: {0}")]
    Broker(String),
}

/// Sink for evaluation requests.
#[async_trait]
pub trait EvalPublisher: Send + Sync {
    /// Publishes one message per request, in order. Stops at the first
    /// failure; requests before it may already have been delivered.
    async fn publish(&self, requests: &[EvaluationRequest]) -> Result<(), PublishError>;
}

/// Wire form of one evaluation message.
pub fn encode(request: &EvaluationRequest) -> Result<Vec<u8>, PublishError> {
    Ok(serde_json::to_vec(request)?)
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::types::EvaluationRequest;

use super::{EvalPublisher, PublishError, encode};

/// Records published requests. Used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    messages: Arc<Mutex<Vec<EvaluationRequest>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything published so far.
    pub async fn messages(&self) -> Vec<EvaluationRequest> {
        self.messages.lock().await.clone()
    }

    /// Makes subsequent publishes fail with [`PublishError::Broker`].
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvalPublisher for MemoryPublisher {
    async fn publish(&self, requests: &[EvaluationRequest]) -> Result<(), PublishError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Broker("publisher set to fail".to_string()));
        }
        for request in requests {
            encode(request)?;
        }
        self.messages.lock().await.extend_from_slice(requests);
        Ok(())
    }
}

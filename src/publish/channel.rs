use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::types::EvaluationRequest;

use super::{EvalPublisher, PublishError};

/// Publishes into a bounded in-process channel. A full channel makes
/// `publish` wait for the consumer.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<EvaluationRequest>,
}

impl ChannelPublisher {
    /// Creates a publisher and the receiver that drains it.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<EvaluationRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ChannelPublisher { tx }, rx)
    }
}

/// Spawns a task feeding every received request to `consume`.
///
/// Once `shutdown` fires the channel is closed and whatever is still buffered
/// is consumed before the task exits. Publishing after that fails with
/// [`PublishError::Closed`].
pub fn spawn_drain<F>(
    mut rx: mpsc::Receiver<EvaluationRequest>,
    shutdown: CancellationToken,
    mut consume: F,
) -> JoinHandle<()>
where
    F: FnMut(EvaluationRequest) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                request = rx.recv() => match request {
                    Some(request) => consume(request),
                    None => return,
                },
            }
        }
        rx.close();
        while let Some(request) = rx.recv().await {
            consume(request);
        }
    })
}

#[async_trait]
impl EvalPublisher for ChannelPublisher {
    async fn publish(&self, requests: &[EvaluationRequest]) -> Result<(), PublishError> {
        for request in requests {
            self.tx
                .send(request.clone())
                .await
                .map_err(|_| PublishError::Closed)?;
        }
        debug!(count = requests.len(), "Published evaluation requests");
        Ok(())
    }
}

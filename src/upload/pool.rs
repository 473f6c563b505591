//! Fixed-size worker pool for upload processing.
//!
//! ```text
//!                        ┌──────────────┐
//!                   ┌──► │ lane 0 queue │ ──► worker 0
//! ┌────────────┐    │    └──────────────┘
//! │  submit    │ ───┤          ...
//! │ (hash id)  │    │    ┌──────────────┐
//! └────────────┘    └──► │ lane N queue │ ──► worker N
//!                        └──────────────┘
//! ```
//!
//! Uploads are routed to a lane by hashing the inventory ID, so uploads for
//! one host are processed in arrival order while different hosts proceed in
//! parallel. Each lane is a tokio task draining a bounded channel. On
//! shutdown a lane closes its channel and processes what is already queued.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::UploadConfig;
use crate::types::InventoryId;

use super::handler::{ParsedUpload, UploadError, UploadHandler, UploadOutcome};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("upload pool is shut down")]
    ShutDown,
}

/// Where a lane reports the outcome of a job, when someone is waiting.
type Reply = oneshot::Sender<Result<UploadOutcome, UploadError>>;

struct Job {
    upload: ParsedUpload,
    reply: Option<Reply>,
}

pub struct UploadPool {
    lanes: Vec<mpsc::Sender<Job>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
}

impl UploadPool {
    /// Spawns `config.lanes` workers sharing `handler`.
    pub fn start(
        handler: Arc<UploadHandler>,
        config: &UploadConfig,
        shutdown: CancellationToken,
    ) -> Self {
        let lane_count = config.lanes.max(1);
        let mut lanes = Vec::with_capacity(lane_count);
        let mut tasks = Vec::with_capacity(lane_count);

        for lane in 0..lane_count {
            let (tx, rx) = mpsc::channel(config.lane_capacity.max(1));
            let handler = handler.clone();
            let cancel = shutdown.child_token();
            tasks.push(tokio::spawn(run_lane(lane, handler, rx, cancel)));
            lanes.push(tx);
        }

        info!(lanes = lane_count, "Upload pool started");
        UploadPool {
            lanes,
            tasks: Mutex::new(tasks),
            shutdown,
        }
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    /// Lane that handles uploads for `inventory_id`.
    pub fn lane_for(&self, inventory_id: &InventoryId) -> usize {
        let mut hasher = DefaultHasher::new();
        inventory_id.hash(&mut hasher);
        (hasher.finish() % self.lanes.len() as u64) as usize
    }

    async fn enqueue(&self, job: Job) -> Result<(), PoolError> {
        if self.shutdown.is_cancelled() {
            return Err(PoolError::ShutDown);
        }
        let lane = self.lane_for(&job.upload.inventory_id());
        self.lanes[lane]
            .send(job)
            .await
            .map_err(|_| PoolError::ShutDown)
    }

    /// Queues an upload without waiting for it to be processed.
    #[instrument(skip_all, fields(inventory_id = %upload.inventory_id()))]
    pub async fn submit(&self, upload: ParsedUpload) -> Result<(), PoolError> {
        self.enqueue(Job {
            upload,
            reply: None,
        })
        .await
    }

    /// Queues an upload and waits for its outcome.
    pub async fn submit_and_wait(
        &self,
        upload: ParsedUpload,
    ) -> Result<Result<UploadOutcome, UploadError>, PoolError> {
        let (tx, rx) = oneshot::channel();
        self.enqueue(Job {
            upload,
            reply: Some(tx),
        })
        .await?;
        // The lane drops the sender only if it stops before reaching the job.
        rx.await.map_err(|_| PoolError::ShutDown)
    }

    /// Stops accepting uploads, lets every lane finish its queued jobs, and
    /// waits for the lanes to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down upload pool");
        self.shutdown.cancel();
        let tasks = std::mem::take(&mut *self.tasks.lock().await);
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "Upload lane task panicked");
            }
        }
    }
}

async fn run_lane(
    lane: usize,
    handler: Arc<UploadHandler>,
    mut rx: mpsc::Receiver<Job>,
    cancel: CancellationToken,
) {
    debug!(lane, "Upload lane started");
    let mut draining = false;
    loop {
        let job = tokio::select! {
            biased;

            _ = cancel.cancelled(), if !draining => {
                // Refuse new jobs but finish the ones already queued.
                rx.close();
                draining = true;
                continue;
            }
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let inventory_id = job.upload.inventory_id();
        let result = handler.process(job.upload).await;
        match &result {
            Ok(outcome) => debug!(
                lane,
                %inventory_id,
                account_id = %outcome.request.account_id,
                "Upload processed"
            ),
            Err(err) => warn!(
                lane,
                %inventory_id,
                reason = err.reason(),
                error = %err,
                "Upload failed"
            ),
        }
        if let Some(reply) = job.reply {
            let _ = reply.send(result);
        }
    }
    debug!(lane, "Upload lane stopped");
}

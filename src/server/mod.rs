//! HTTP server.
//!
//! # Endpoints
//!
//! - `GET /health` - Returns 200 if the server is running
//! - `GET /api/v1/checkpoints` - Stored sync checkpoints as JSON
//! - `POST /api/v1/sync` - Queues a repo-based evaluation pass (202)
//! - `POST /api/v1/uploads` - Processes a host-upload message (202)

use std::sync::Arc;

pub mod checkpoints;
pub mod health;
pub mod sync;
pub mod uploads;

pub use checkpoints::checkpoints_handler;
pub use health::health_handler;
pub use sync::sync_handler;
pub use uploads::upload_handler;

use crate::store::CheckpointStore;
use crate::sync::SyncTrigger;
use crate::upload::UploadPool;

/// Shared application state, passed to handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    checkpoints: Arc<dyn CheckpointStore>,
    sync_trigger: SyncTrigger,
    uploads: Arc<UploadPool>,
}

impl AppState {
    pub fn new(
        checkpoints: Arc<dyn CheckpointStore>,
        sync_trigger: SyncTrigger,
        uploads: Arc<UploadPool>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                checkpoints,
                sync_trigger,
                uploads,
            }),
        }
    }

    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.inner.checkpoints.as_ref()
    }

    pub fn sync_trigger(&self) -> &SyncTrigger {
        &self.inner.sync_trigger
    }

    pub fn uploads(&self) -> &UploadPool {
        &self.inner.uploads
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/checkpoints", get(checkpoints_handler))
        .route("/api/v1/sync", post(sync_handler))
        .route("/api/v1/uploads", post(upload_handler))
        .with_state(app_state)
}

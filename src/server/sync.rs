//! Manual sync trigger.

use axum::extract::State;
use axum::http::StatusCode;
use tracing::info;

use super::AppState;
use crate::sync::TriggerStatus;

/// `POST /api/v1/sync`
///
/// Queues a repo-based pass. Requests made while one is already pending
/// merge into it.
pub async fn sync_handler(State(app_state): State<AppState>) -> (StatusCode, &'static str) {
    match app_state.sync_trigger().request() {
        TriggerStatus::Queued => {
            info!("Sync pass queued");
            (StatusCode::ACCEPTED, "Accepted")
        }
        TriggerStatus::AlreadyQueued => (StatusCode::ACCEPTED, "Accepted (already queued)"),
        TriggerStatus::Stopped => (StatusCode::SERVICE_UNAVAILABLE, "Sync scheduler stopped"),
    }
}

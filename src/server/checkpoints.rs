//! Read-only view of the sync checkpoints.

use std::collections::BTreeMap;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use super::AppState;
use crate::store::StoreError;
use crate::store::checkpoint::format_checkpoint;

#[derive(Debug, Serialize)]
pub struct CheckpointsResponse {
    /// Key name to stored timestamp. Keys never written are omitted.
    pub checkpoints: BTreeMap<&'static str, String>,
}

pub struct CheckpointsError(StoreError);

impl IntoResponse for CheckpointsError {
    fn into_response(self) -> Response {
        (StatusCode::INTERNAL_SERVER_ERROR, self.0.to_string()).into_response()
    }
}

/// `GET /api/v1/checkpoints`
///
/// ```ignore
/// HTTP/1.1 200 OK
/// Content-Type: application/json
///
/// {"checkpoints": {"last_eval_repo_based": "2024-01-05T06:39:54Z", "last_sync": "..."}}
/// ```
pub async fn checkpoints_handler(
    State(app_state): State<AppState>,
) -> Result<Json<CheckpointsResponse>, CheckpointsError> {
    let stored = app_state
        .checkpoints()
        .all_timestamps()
        .await
        .map_err(CheckpointsError)?;

    let checkpoints = stored
        .into_iter()
        .map(|(key, ts)| (key.as_str(), format_checkpoint(&ts)))
        .collect();
    Ok(Json(CheckpointsResponse { checkpoints }))
}

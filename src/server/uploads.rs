//! HTTP intake for host-upload messages.
//!
//! Accepts the same JSON body the broker delivers, validates it, and hands it
//! to the upload pool. The response reflects the processed outcome, so store
//! and publish failures reach the caller.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::upload::{PoolError, UploadError, parse_upload};

#[derive(Debug, Error)]
pub enum IntakeError {
    /// The message failed validation.
    #[error("{0}")]
    Rejected(#[from] UploadError),

    #[error("{0}")]
    Unavailable(#[from] PoolError),
}

impl IntakeError {
    /// Stable label for logs and response bodies.
    pub fn reason(&self) -> &'static str {
        match self {
            IntakeError::Rejected(err) => err.reason(),
            IntakeError::Unavailable(PoolError::ShutDown) => "shut_down",
        }
    }
}

impl IntoResponse for IntakeError {
    fn into_response(self) -> Response {
        let status = match &self {
            IntakeError::Rejected(UploadError::InvalidPayload(_))
            | IntakeError::Rejected(UploadError::InvalidIdentity(_)) => StatusCode::BAD_REQUEST,
            IntakeError::Rejected(UploadError::MissingIdentity) => StatusCode::UNAUTHORIZED,
            IntakeError::Rejected(UploadError::NotEntitled(_)) => StatusCode::FORBIDDEN,
            IntakeError::Rejected(UploadError::Store(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            IntakeError::Rejected(UploadError::Publish(_)) | IntakeError::Unavailable(_) => {
                StatusCode::SERVICE_UNAVAILABLE
            }
        };
        (status, format!("{}: {}", self.reason(), self)).into_response()
    }
}

/// `POST /api/v1/uploads`
///
/// Waits for the pool to store the host and publish its evaluation request.
///
/// - 202 Accepted: host stored, evaluation requested
/// - 400 Bad Request: body is not an upload message, or identity undecodable
/// - 401 Unauthorized: identity missing
/// - 403 Forbidden: identity type not allowed to upload
/// - 500 Internal Server Error: the store write failed
/// - 503 Service Unavailable: publishing failed, or the pool is shut down
pub async fn upload_handler(
    State(app_state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, &'static str), IntakeError> {
    let upload = parse_upload(&body).map_err(|err| {
        debug!(reason = err.reason(), error = %err, "Upload rejected");
        err
    })?;
    let inventory_id = upload.inventory_id();

    match app_state.uploads().submit_and_wait(upload).await {
        Ok(Ok(outcome)) => {
            info!(%inventory_id, host_id = outcome.host_id, "Upload processed");
            Ok((StatusCode::ACCEPTED, "Accepted"))
        }
        Ok(Err(err)) => Err(err.into()),
        Err(err) => {
            warn!(%inventory_id, error = %err, "Failed to queue upload");
            Err(err.into())
        }
    }
}

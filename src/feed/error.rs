//! Feed call errors.
//!
//! Every failure reports the HTTP status code when one was received, so the
//! retry controller can match it against the configured retriable codes.

use thiserror::Error;

use crate::retry::StatusCoded;

/// Maximum number of response body bytes kept for diagnostics.
const MAX_BODY_EXCERPT: usize = 512;

/// A single failed feed call.
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed answered with a non-2xx status.
    #[error("received non 2xx status code, status code: {status}")]
    Status { status: u16, body: String },

    /// Connection, timeout or body-read failure.
    #[error("feed transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The body was not the expected JSON.
    #[error("invalid {endpoint} response: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl FeedError {
    pub fn status(status: u16, body: &[u8]) -> Self {
        let body = String::from_utf8_lossy(body);
        let body = match body.char_indices().nth(MAX_BODY_EXCERPT) {
            Some((idx, _)) => format!("{}...", &body[..idx]),
            None => body.into_owned(),
        };
        FeedError::Status { status, body }
    }
}

impl StatusCoded for FeedError {
    fn status_code(&self) -> Option<u16> {
        match self {
            FeedError::Status { status, .. } => Some(*status),
            FeedError::Transport(e) => e.status().map(|s| s.as_u16()),
            FeedError::Decode { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_reports_code() {
        let err = FeedError::status(503, b"unavailable");
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(
            err.to_string(),
            "received non 2xx status code, status code: 503"
        );
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match FeedError::status(500, body.as_bytes()) {
            FeedError::Status { body, .. } => assert_eq!(body.len(), MAX_BODY_EXCERPT + 3),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn decode_error_has_no_status() {
        let source = serde_json::from_str::<u32>("nope").unwrap_err();
        let err = FeedError::Decode {
            endpoint: "repos",
            source,
        };
        assert_eq!(err.status_code(), None);
    }
}

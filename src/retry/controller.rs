//! Retry loop for fallible network calls.
//!
//! [`call_with_retry`] runs an async operation until it succeeds, hits a
//! terminal failure, exhausts its backoff budget, or is cancelled.
//!
//! Classification depends on the allow-list of retriable status codes:
//!
//! - A failure carrying a listed code is retried.
//! - With an empty list, every failure is retried.
//! - With a non-empty list, any other failure is terminal and returned with
//!   the observed status code.

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::backoff::BackoffPolicy;

/// Errors that may carry the HTTP status code of the failed call.
pub trait StatusCoded {
    fn status_code(&self) -> Option<u16>;
}

/// Why a retried call gave up.
#[derive(Debug, Error)]
pub enum RetryError<E: std::error::Error + 'static> {
    /// A failure outside the retriable set.
    #[error("HTTP call failed{}: {source}", status_suffix(.status_code))]
    Terminal {
        attempts: u32,
        status_code: Option<u16>,
        #[source]
        source: E,
    },

    /// Every allowed attempt failed.
    #[error("HTTP retry call failed, attempts: {attempts}")]
    Exhausted {
        attempts: u32,
        #[source]
        last_error: E,
    },

    /// Shutdown was requested while waiting to retry.
    #[error("HTTP retry call cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

impl<E: std::error::Error + 'static> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Terminal { attempts, .. }
            | RetryError::Exhausted { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

impl<E: std::error::Error + StatusCoded + 'static> RetryError<E> {
    /// Status code of the last failed attempt, if one was observed.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            RetryError::Terminal { status_code, .. } => *status_code,
            RetryError::Exhausted { last_error, .. } => last_error.status_code(),
            RetryError::Cancelled { .. } => None,
        }
    }
}

fn status_suffix(status_code: &Option<u16>) -> String {
    match status_code {
        Some(code) => format!(", status code: {code}"),
        None => String::new(),
    }
}

fn status_code_found(status_code: Option<u16>, retry_codes: &[u16]) -> bool {
    status_code.is_some_and(|code| retry_codes.contains(&code))
}

/// Runs `operation` under `policy`.
///
/// The wait between attempts is the only place this function suspends on its
/// own; cancelling `cancel` ends that wait and returns
/// [`RetryError::Cancelled`]. A token cancelled before the first attempt
/// prevents the call entirely.
pub async fn call_with_retry<T, E, F, Fut>(
    policy: &BackoffPolicy,
    cancel: &CancellationToken,
    retry_codes: &[u16],
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::error::Error + StatusCoded + 'static,
{
    let mut backoff = policy.start();
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }

        attempt += 1;
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let status_code = err.status_code();
        if status_code_found(status_code, retry_codes) {
            warn!(attempt, status_code = ?status_code, "HTTP call ended with wrong status code");
        } else if retry_codes.is_empty() {
            warn!(attempt, error = %err, "HTTP call failed, trying again");
        } else {
            return Err(RetryError::Terminal {
                attempts: attempt,
                status_code,
                source: err,
            });
        }

        let Some(delay) = backoff.next_delay() else {
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last_error: err,
            });
        };

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

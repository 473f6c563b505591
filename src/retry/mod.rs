//! Bounded retry with constant or exponential backoff.
//!
//! - [`backoff`]: the delay sequence, independent of any transport
//! - [`controller`]: the retry loop that drives a fallible async call

pub mod backoff;
pub mod controller;

pub use backoff::{Backoff, BackoffKind, BackoffPolicy};
pub use controller::{RetryError, StatusCoded, call_with_retry};

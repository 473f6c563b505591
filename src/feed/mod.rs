//! Client for the external repository metadata feed.
//!
//! - [`types`]: typed request/response payloads
//! - [`error`]: per-call failures with status codes
//! - [`client`]: the [`FeedApi`] seam and its reqwest implementation

pub mod client;
pub mod error;
pub mod types;

pub use client::{FeedApi, FeedClient, FeedResult};
pub use error::FeedError;
pub use types::{DbChange, FeedEndpoint, RepoAttributes, ReposRequest, ReposResponse};

//! Host-upload ingestion.
//!
//! - [`message`]: inbound message shape, lenient timestamps, profile checksum
//! - [`identity`]: base64 platform identity
//! - [`handler`]: validate, resolve account, upsert host, request evaluation
//! - [`pool`]: lanes keyed by inventory ID

pub mod handler;
pub mod identity;
pub mod message;
pub mod pool;

pub use handler::{ParsedUpload, UploadError, UploadHandler, UploadOutcome, parse_upload};
pub use identity::Identity;
pub use message::UploadEvent;
pub use pool::{PoolError, UploadPool};

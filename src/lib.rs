//! patch-sync: incremental repository change detection and host evaluation
//! dispatch.
//!
//! Two triggers feed one publication path:
//!
//! - the periodic repo-based sync ([`sync`]) sweeps the metadata feed
//!   ([`feed`]) for changed repositories and resolves the hosts using them;
//! - host uploads ([`upload`]) store the host's current state.
//!
//! Both end in [`publish::EvalPublisher`], one evaluation request per host.

pub mod broker;
pub mod config;
pub mod feed;
pub mod publish;
pub mod retry;
pub mod server;
pub mod store;
pub mod sync;
pub mod types;
pub mod upload;

#[cfg(test)]
pub mod test_utils;

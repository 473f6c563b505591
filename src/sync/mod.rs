//! Repo-based evaluation: detect changed repositories in the metadata feed
//! and dispatch re-evaluation of every host that uses them.
//!
//! - [`detector`]: paginated sweep producing a [`RepositoryChangeSet`]
//! - [`resolver`]: changed repositories to affected hosts
//! - [`pass`]: one detect, resolve, publish, checkpoint cycle
//! - [`scheduler`]: periodic, non-overlapping driver with a manual trigger

pub mod detector;
pub mod pass;
pub mod resolver;
pub mod scheduler;

pub use detector::{ChangeDetector, RepositoryChangeSet};
pub use pass::{PassOutcome, RepoBasedPass, SyncError};
pub use resolver::AffectedHostResolver;
pub use scheduler::{SyncScheduler, SyncTrigger, TriggerStatus};

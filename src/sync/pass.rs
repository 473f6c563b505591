//! One repo-based evaluation pass.
//!
//! Order of operations:
//!
//! 1. Export watch: skip the sweep when the feed has exported nothing since
//!    the `last_export` checkpoint.
//! 2. Detect changed repositories since `last_eval_repo_based`.
//! 3. Resolve affected hosts and publish one evaluation request per host.
//! 4. Advance checkpoints.
//!
//! Checkpoints only move after publication succeeded, so a failed pass is
//! repeated in full on the next run (at-least-once dispatch).

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use thiserror::Error;
use tracing::{info, instrument};

use crate::feed::{FeedApi, FeedError};
use crate::publish::{EvalPublisher, PublishError};
use crate::retry::RetryError;
use crate::store::{CheckpointKey, CheckpointStore, StoreError};

use super::detector::ChangeDetector;
use super::resolver::AffectedHostResolver;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("feed request failed: {0}")]
    Feed(#[from] RetryError<FeedError>),

    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    #[error("publishing evaluation requests failed: {0}")]
    Publish(#[from] PublishError),
}

impl SyncError {
    /// True when the pass stopped because shutdown was requested.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, SyncError::Feed(err) if err.is_cancelled())
    }
}

/// What a successful pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    /// The feed has not exported since the last pass; nothing was swept.
    ExportUnchanged { exported: DateTime<Utc> },
    /// The sweep gave no safe checkpoint; nothing was published.
    NoChanges,
    Dispatched {
        first_party: usize,
        third_party: usize,
        requests: usize,
        checkpoint: DateTime<Utc>,
    },
}

enum ExportState {
    Changed(DateTime<Utc>),
    /// Carries the stored `last_export` value.
    Unchanged(DateTime<Utc>),
}

pub struct RepoBasedPass {
    feed: Arc<dyn FeedApi>,
    detector: ChangeDetector,
    resolver: AffectedHostResolver,
    checkpoints: Arc<dyn CheckpointStore>,
    publisher: Arc<dyn EvalPublisher>,
    skip_unchanged_export: bool,
}

impl RepoBasedPass {
    pub fn new(
        feed: Arc<dyn FeedApi>,
        detector: ChangeDetector,
        resolver: AffectedHostResolver,
        checkpoints: Arc<dyn CheckpointStore>,
        publisher: Arc<dyn EvalPublisher>,
        skip_unchanged_export: bool,
    ) -> Self {
        RepoBasedPass {
            feed,
            detector,
            resolver,
            checkpoints,
            publisher,
            skip_unchanged_export,
        }
    }

    /// Compares the feed's export time with the `last_export` checkpoint.
    async fn check_export(&self) -> Result<ExportState, SyncError> {
        let exported = self.feed.db_change().await?.exported;
        let last = self.checkpoints.get_timestamp(CheckpointKey::LastExport).await?;
        // Stored values have whole-second precision.
        match last {
            Some(last) if exported.trunc_subsecs(0) <= last => Ok(ExportState::Unchanged(last)),
            _ => Ok(ExportState::Changed(exported)),
        }
    }

    #[instrument(skip(self))]
    pub async fn run(&self) -> Result<PassOutcome, SyncError> {
        let exported = if self.skip_unchanged_export {
            match self.check_export().await? {
                ExportState::Changed(exported) => Some(exported),
                ExportState::Unchanged(last) => {
                    info!(exported = %last, "Feed export unchanged, skipping sweep");
                    self.checkpoints
                        .set_timestamp(CheckpointKey::LastSync, Utc::now())
                        .await?;
                    return Ok(PassOutcome::ExportUnchanged { exported: last });
                }
            }
        } else {
            None
        };

        let since = self
            .checkpoints
            .get_timestamp(CheckpointKey::LastEvalRepoBased)
            .await?;
        let changes = self.detector.detect(since).await?;

        let outcome = match changes.latest_change {
            None => PassOutcome::NoChanges,
            Some(checkpoint) => {
                let requests = self.resolver.resolve(&changes.all_repos()).await?;
                self.publisher.publish(&requests).await?;
                self.checkpoints
                    .set_timestamp(CheckpointKey::LastEvalRepoBased, checkpoint)
                    .await?;
                info!(
                    requests = requests.len(),
                    checkpoint = %checkpoint,
                    "Repo-based evaluation dispatched"
                );
                PassOutcome::Dispatched {
                    first_party: changes.first_party.len(),
                    third_party: changes.third_party.len(),
                    requests: requests.len(),
                    checkpoint,
                }
            }
        };

        let now = Utc::now();
        if let Some(exported) = exported {
            self.checkpoints
                .set_timestamp(CheckpointKey::LastExport, exported)
                .await?;
        }
        if since.is_none() {
            self.checkpoints
                .set_timestamp(CheckpointKey::LastFullSync, now)
                .await?;
        }
        self.checkpoints
            .set_timestamp(CheckpointKey::LastSync, now)
            .await?;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::publish::MemoryPublisher;
    use crate::store::{HostStore, MemoryStore};
    use crate::test_utils::{FakeFeed, host_upsert, inventory_id, ts};
    use crate::types::OrgId;
    use chrono::TimeDelta;
    use std::time::Duration;

    struct Fixture {
        feed: FakeFeed,
        store: MemoryStore,
        publisher: MemoryPublisher,
    }

    impl Fixture {
        fn new() -> Self {
            Fixture {
                feed: FakeFeed::new(),
                store: MemoryStore::new(),
                publisher: MemoryPublisher::new(),
            }
        }

        fn pass(&self, skip_unchanged_export: bool) -> RepoBasedPass {
            let feed: Arc<dyn FeedApi> = Arc::new(self.feed.clone());
            let mut config = Config::default().feed;
            config.page_size = 2;
            RepoBasedPass::new(
                feed.clone(),
                ChangeDetector::new(feed, &config, Duration::from_secs(1)),
                AffectedHostResolver::new(Arc::new(self.store.clone())),
                Arc::new(self.store.clone()),
                Arc::new(self.publisher.clone()),
                skip_unchanged_export,
            )
        }

        async fn host(&self, org: &str, n: u128, repos: &[&str]) {
            let account = self
                .store
                .get_or_create_account(&OrgId::from(org))
                .await
                .unwrap();
            self.store
                .upsert_host(account.id, &host_upsert(n, repos))
                .await
                .unwrap();
        }

        async fn checkpoint(&self, key: CheckpointKey) -> Option<DateTime<Utc>> {
            self.store.get_timestamp(key).await.unwrap()
        }
    }

    #[tokio::test]
    async fn first_pass_publishes_affected_hosts_and_advances() {
        let fx = Fixture::new();
        fx.feed.add_repo("A", false, ts(10, 0, 0));
        fx.feed.add_repo("B", true, ts(10, 0, 0));
        fx.feed.add_repo("C", false, ts(11, 0, 0));
        fx.host("org-1", 1, &["A"]).await;
        fx.host("org-2", 2, &["C", "unrelated"]).await;
        fx.host("org-1", 3, &["unrelated"]).await;

        let outcome = fx.pass(false).run().await.unwrap();

        assert_eq!(
            outcome,
            PassOutcome::Dispatched {
                first_party: 2,
                third_party: 1,
                requests: 2,
                checkpoint: ts(11, 0, 1),
            }
        );
        let published: Vec<_> = fx
            .publisher
            .messages()
            .await
            .into_iter()
            .map(|r| r.inventory_id)
            .collect();
        assert_eq!(published, vec![inventory_id(1), inventory_id(2)]);
        assert_eq!(
            fx.checkpoint(CheckpointKey::LastEvalRepoBased).await,
            Some(ts(11, 0, 1))
        );
        assert!(fx.checkpoint(CheckpointKey::LastFullSync).await.is_some());
        assert!(fx.checkpoint(CheckpointKey::LastSync).await.is_some());
    }

    #[tokio::test]
    async fn rerun_with_unchanged_feed_publishes_nothing() {
        let fx = Fixture::new();
        // Sub-second change time, truncated when stored.
        fx.feed
            .add_repo("A", false, ts(10, 0, 0) + TimeDelta::microseconds(553_807));
        fx.host("org-1", 1, &["A"]).await;

        let pass = fx.pass(false);
        pass.run().await.unwrap();
        assert_eq!(fx.publisher.messages().await.len(), 1);

        let outcome = pass.run().await.unwrap();
        assert_eq!(outcome, PassOutcome::NoChanges);
        assert_eq!(fx.publisher.messages().await.len(), 1);
        assert_eq!(
            fx.checkpoint(CheckpointKey::LastEvalRepoBased).await,
            Some(ts(10, 0, 1))
        );
    }

    #[tokio::test]
    async fn absent_latest_change_leaves_checkpoint() {
        let fx = Fixture::new();
        fx.feed.add_repo("A", false, ts(10, 0, 0));
        fx.feed.omit_latest_from_page(1);
        fx.host("org-1", 1, &["A"]).await;

        let outcome = fx.pass(false).run().await.unwrap();

        assert_eq!(outcome, PassOutcome::NoChanges);
        assert!(fx.publisher.messages().await.is_empty());
        assert_eq!(fx.checkpoint(CheckpointKey::LastEvalRepoBased).await, None);
    }

    #[tokio::test]
    async fn changes_without_hosts_advance_without_publishing() {
        let fx = Fixture::new();
        fx.feed.add_repo("A", false, ts(10, 0, 0));

        let outcome = fx.pass(false).run().await.unwrap();

        assert!(matches!(outcome, PassOutcome::Dispatched { requests: 0, .. }));
        assert!(fx.publisher.messages().await.is_empty());
        assert_eq!(fx.store.repo_query_count(), 1);
    }

    #[tokio::test]
    async fn page_failure_keeps_checkpoint() {
        let fx = Fixture::new();
        fx.feed.add_repo("A", false, ts(10, 0, 0));
        fx.feed.add_repo("B", false, ts(10, 0, 0));
        fx.feed.add_repo("C", false, ts(11, 0, 0));
        fx.feed.fail_on_page(Some(2));
        fx.host("org-1", 1, &["A"]).await;

        let err = fx.pass(false).run().await.unwrap_err();

        assert!(matches!(err, SyncError::Feed(_)));
        assert!(!err.is_cancelled());
        assert!(fx.publisher.messages().await.is_empty());
        assert_eq!(fx.checkpoint(CheckpointKey::LastEvalRepoBased).await, None);
        assert_eq!(fx.checkpoint(CheckpointKey::LastSync).await, None);
    }

    #[tokio::test]
    async fn publish_failure_keeps_checkpoint_and_retries_next_pass() {
        let fx = Fixture::new();
        fx.feed.add_repo("A", false, ts(10, 0, 0));
        fx.host("org-1", 1, &["A"]).await;
        let pass = fx.pass(false);

        fx.publisher.set_failing(true);
        let err = pass.run().await.unwrap_err();
        assert!(matches!(err, SyncError::Publish(_)));
        assert_eq!(fx.checkpoint(CheckpointKey::LastEvalRepoBased).await, None);

        fx.publisher.set_failing(false);
        pass.run().await.unwrap();
        assert_eq!(fx.publisher.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn previous_checkpoint_is_sent_as_modified_since() {
        let fx = Fixture::new();
        fx.store
            .set_timestamp(CheckpointKey::LastEvalRepoBased, ts(9, 0, 0))
            .await
            .unwrap();
        fx.feed.add_repo("old", false, ts(8, 0, 0));
        fx.feed.add_repo("new", false, ts(9, 30, 0));
        fx.host("org-1", 1, &["old"]).await;
        fx.host("org-1", 2, &["new"]).await;

        fx.pass(false).run().await.unwrap();

        assert_eq!(fx.feed.requests()[0].modified_since, Some(ts(9, 0, 0)));
        let published = fx.publisher.messages().await;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].inventory_id, inventory_id(2));
        // Incremental passes are not full syncs.
        assert_eq!(fx.checkpoint(CheckpointKey::LastFullSync).await, None);
    }

    #[tokio::test]
    async fn unchanged_export_skips_sweep() {
        let fx = Fixture::new();
        fx.feed.set_exported(ts(6, 0, 0) + TimeDelta::milliseconds(250));
        fx.feed.add_repo("A", false, ts(5, 0, 0));
        let pass = fx.pass(true);

        pass.run().await.unwrap();
        assert_eq!(fx.checkpoint(CheckpointKey::LastExport).await, Some(ts(6, 0, 0)));
        let sweeps = fx.feed.requests().len();

        let outcome = pass.run().await.unwrap();
        assert_eq!(
            outcome,
            PassOutcome::ExportUnchanged {
                exported: ts(6, 0, 0)
            }
        );
        assert_eq!(fx.feed.requests().len(), sweeps);
        assert_eq!(fx.feed.db_change_calls(), 2);

        fx.feed.set_exported(ts(7, 0, 0));
        pass.run().await.unwrap();
        assert!(fx.feed.requests().len() > sweeps);
    }
}

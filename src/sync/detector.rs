//! Incremental change detection over the metadata feed.
//!
//! A sweep walks every page of `POST /repos` filtered by the last checkpoint,
//! splits repositories by origin, and proposes the next checkpoint.
//!
//! # Checkpoint margin
//!
//! The feed reports change times with sub-second precision while checkpoints
//! are stored at whole seconds. Re-querying with the truncated value would
//! return the newest repository again, so each observed change time is pushed
//! forward by a margin (one second by default) before it becomes a candidate.
//! The proposal never moves backwards past the previous checkpoint.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{info, instrument};

use crate::config::FeedConfig;
use crate::feed::{FeedApi, FeedResult, ReposRequest};

/// Repositories changed since the last checkpoint, split by origin.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepositoryChangeSet {
    pub first_party: BTreeSet<String>,
    pub third_party: BTreeSet<String>,
    /// Proposed next checkpoint. `None` when the feed gave no latest change,
    /// in which case the checkpoint must not move.
    pub latest_change: Option<DateTime<Utc>>,
}

impl RepositoryChangeSet {
    pub fn is_empty(&self) -> bool {
        self.first_party.is_empty() && self.third_party.is_empty()
    }

    /// Both origins combined.
    pub fn all_repos(&self) -> BTreeSet<String> {
        self.first_party.union(&self.third_party).cloned().collect()
    }
}

pub struct ChangeDetector {
    feed: Arc<dyn FeedApi>,
    page_size: u32,
    repository_pattern: String,
    margin: TimeDelta,
}

impl ChangeDetector {
    pub fn new(feed: Arc<dyn FeedApi>, config: &FeedConfig, margin: Duration) -> Self {
        ChangeDetector {
            feed,
            page_size: config.page_size,
            repository_pattern: config.repository_pattern.clone(),
            margin: TimeDelta::from_std(margin).unwrap_or(TimeDelta::seconds(1)),
        }
    }

    fn request(&self, page: u32, since: Option<DateTime<Utc>>) -> ReposRequest {
        ReposRequest {
            page,
            page_size: self.page_size,
            repository_list: vec![self.repository_pattern.clone()],
            third_party: true,
            modified_since: since,
        }
    }

    /// Sweeps all pages modified since `since`.
    ///
    /// Any page failure aborts the sweep; nothing partial is returned.
    #[instrument(skip(self))]
    pub async fn detect(&self, since: Option<DateTime<Utc>>) -> FeedResult<RepositoryChangeSet> {
        let started = Instant::now();
        let mut changes = RepositoryChangeSet::default();
        let mut max_candidate: Option<DateTime<Utc>> = None;
        let mut page = 1u32;

        loop {
            let response = self.feed.repos_page(&self.request(page, since)).await?;
            if response.pages < 1 {
                info!("No repos returned from feed");
                break;
            }

            let Some(latest) = response.latest_repo_change else {
                break;
            };
            let candidate = latest.checked_add_signed(self.margin).unwrap_or(latest);
            if max_candidate.is_none_or(|current| current < candidate) {
                max_candidate = Some(candidate);
            }

            info!(
                page,
                pages = response.pages,
                count = response.repository_list.len(),
                sync_duration_secs = started.elapsed().as_secs(),
                "Downloaded repos"
            );

            for (name, content_sets) in response.repository_list {
                if content_sets.iter().any(|attrs| attrs.is_third_party()) {
                    changes.third_party.insert(name);
                } else {
                    changes.first_party.insert(name);
                }
            }

            if page >= response.pages {
                break;
            }
            page += 1;
        }

        changes.latest_change = match (max_candidate, since) {
            (Some(candidate), Some(previous)) => Some(candidate.max(previous)),
            (candidate, _) => candidate,
        };

        info!(
            first_party = changes.first_party.len(),
            third_party = changes.third_party.len(),
            "Repos downloading complete"
        );
        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::feed::{DbChange, RepoAttributes, ReposResponse};
    use crate::test_utils::{FakeFeed, arb_catalog, ts};
    use proptest::prelude::*;

    fn detector(feed: &FakeFeed, page_size: u32) -> ChangeDetector {
        let mut config = Config::default().feed;
        config.page_size = page_size;
        ChangeDetector::new(Arc::new(feed.clone()), &config, Duration::from_secs(1))
    }

    fn names(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn two_page_sweep_partitions_and_advances_past_latest() {
        let feed = FakeFeed::new();
        feed.add_repo("A", false, ts(10, 0, 0));
        feed.add_repo("B", true, ts(10, 0, 0));
        feed.add_repo("C", false, ts(11, 0, 0));

        let changes = detector(&feed, 2).detect(None).await.unwrap();

        assert_eq!(changes.first_party, names(&["A", "C"]));
        assert_eq!(changes.third_party, names(&["B"]));
        assert_eq!(changes.latest_change, Some(ts(11, 0, 1)));
        assert_eq!(feed.requests().len(), 2);
    }

    #[tokio::test]
    async fn requests_carry_pattern_and_checkpoint() {
        let feed = FakeFeed::new();
        feed.add_repo("A", false, ts(10, 0, 0));

        detector(&feed, 10).detect(Some(ts(9, 0, 0))).await.unwrap();

        let request = &feed.requests()[0];
        assert_eq!(request.page, 1);
        assert_eq!(request.repository_list, vec![".*".to_string()]);
        assert!(request.third_party);
        assert_eq!(request.modified_since, Some(ts(9, 0, 0)));
    }

    #[tokio::test]
    async fn zero_pages_means_no_change() {
        let feed = FakeFeed::new();
        let changes = detector(&feed, 10).detect(Some(ts(9, 0, 0))).await.unwrap();

        assert!(changes.is_empty());
        assert_eq!(changes.latest_change, None);
    }

    #[tokio::test]
    async fn absent_latest_change_stops_without_proposal() {
        let feed = FakeFeed::new();
        feed.add_repo("A", false, ts(10, 0, 0));
        feed.omit_latest_from_page(1);

        let changes = detector(&feed, 10).detect(None).await.unwrap();

        assert_eq!(changes, RepositoryChangeSet::default());
    }

    #[tokio::test]
    async fn absent_latest_change_mid_sweep_keeps_earlier_pages() {
        let feed = FakeFeed::new();
        feed.add_repo("A", false, ts(10, 0, 0));
        feed.add_repo("B", false, ts(11, 0, 0));
        feed.omit_latest_from_page(2);

        let changes = detector(&feed, 1).detect(None).await.unwrap();

        assert_eq!(changes.first_party, names(&["A"]));
        assert_eq!(changes.latest_change, Some(ts(10, 0, 1)));
    }

    #[tokio::test]
    async fn page_failure_aborts_sweep() {
        let feed = FakeFeed::new();
        feed.add_repo("A", false, ts(10, 0, 0));
        feed.add_repo("B", false, ts(11, 0, 0));
        feed.fail_on_page(Some(2));

        let err = detector(&feed, 1).detect(None).await.unwrap_err();
        assert_eq!(err.status_code(), Some(500));
    }

    /// A feed whose reported change time lags the caller's checkpoint.
    struct SkewedFeed;

    #[async_trait::async_trait]
    impl FeedApi for SkewedFeed {
        async fn repos_page(&self, _request: &ReposRequest) -> FeedResult<ReposResponse> {
            Ok(ReposResponse {
                page: 1,
                pages: 1,
                repository_list: [("A".to_string(), vec![RepoAttributes::default()])].into(),
                latest_repo_change: Some(ts(9, 0, 0)),
                ..ReposResponse::default()
            })
        }

        async fn db_change(&self) -> FeedResult<DbChange> {
            unreachable!("not used by the detector")
        }
    }

    #[tokio::test]
    async fn proposal_never_precedes_previous_checkpoint() {
        let detector = ChangeDetector::new(
            Arc::new(SkewedFeed),
            &Config::default().feed,
            Duration::from_secs(1),
        );

        let changes = detector.detect(Some(ts(10, 0, 0))).await.unwrap();

        assert_eq!(changes.first_party, names(&["A"]));
        assert_eq!(changes.latest_change, Some(ts(10, 0, 0)));
    }

    proptest! {
        #[test]
        fn sweep_covers_every_repo_exactly_once(catalog in arb_catalog(), page_size in 1u32..7) {
            let feed = FakeFeed::new();
            for (name, (third_party, offset)) in &catalog {
                feed.add_repo(name, *third_party, ts(0, 0, 0) + TimeDelta::seconds(i64::from(*offset)));
            }

            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let changes = rt.block_on(detector(&feed, page_size).detect(None)).unwrap();

            prop_assert!(changes.first_party.is_disjoint(&changes.third_party));
            let expected_third: BTreeSet<String> = catalog
                .iter()
                .filter(|(_, (third_party, _))| *third_party)
                .map(|(name, _)| name.clone())
                .collect();
            prop_assert_eq!(&changes.third_party, &expected_third);
            prop_assert_eq!(changes.all_repos().len(), catalog.len());

            let max_offset = catalog.values().map(|(_, offset)| *offset).max();
            let expected_latest = max_offset
                .map(|o| ts(0, 0, 0) + TimeDelta::seconds(i64::from(o) + 1));
            prop_assert_eq!(changes.latest_change, expected_latest);
        }
    }
}

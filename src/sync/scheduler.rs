//! Periodic driver for [`RepoBasedPass`].
//!
//! A single task runs passes back to back, never concurrently. Passes start
//! on the interval tick or on a manual trigger. Triggers go through a
//! capacity-1 channel, so requests made while one is already pending
//! coalesce into it.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::pass::{PassOutcome, RepoBasedPass};

/// Result of asking for an out-of-schedule pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerStatus {
    Queued,
    /// A trigger is already pending; this one merged into it.
    AlreadyQueued,
    /// The scheduler has stopped.
    Stopped,
}

/// Handle for requesting a pass outside the schedule.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<()>,
}

impl SyncTrigger {
    pub fn request(&self) -> TriggerStatus {
        match self.tx.try_send(()) {
            Ok(()) => TriggerStatus::Queued,
            Err(mpsc::error::TrySendError::Full(())) => TriggerStatus::AlreadyQueued,
            Err(mpsc::error::TrySendError::Closed(())) => TriggerStatus::Stopped,
        }
    }
}

pub struct SyncScheduler {
    pass: RepoBasedPass,
    interval: Duration,
    triggers: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

impl SyncScheduler {
    pub fn new(
        pass: RepoBasedPass,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (Self, SyncTrigger) {
        let (tx, triggers) = mpsc::channel(1);
        let scheduler = SyncScheduler {
            pass,
            interval,
            triggers,
            cancel,
        };
        (scheduler, SyncTrigger { tx })
    }

    /// Runs until cancelled. The first pass starts immediately.
    pub async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_secs = self.interval.as_secs(), "Sync scheduler started");

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
                Some(()) = self.triggers.recv() => {
                    info!("Manual sync requested");
                }
            }
            self.run_once().await;
        }

        info!("Sync scheduler stopped");
    }

    async fn run_once(&self) {
        match self.pass.run().await {
            Ok(PassOutcome::Dispatched {
                first_party,
                third_party,
                requests,
                checkpoint,
            }) => {
                info!(first_party, third_party, requests, %checkpoint, "Sync pass complete");
            }
            Ok(outcome) => debug!(?outcome, "Sync pass complete"),
            Err(err) if err.is_cancelled() => debug!("Sync pass cancelled"),
            Err(err) => error!(error = %err, "Sync pass failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::feed::FeedApi;
    use crate::publish::MemoryPublisher;
    use crate::store::MemoryStore;
    use crate::sync::{AffectedHostResolver, ChangeDetector};
    use crate::test_utils::FakeFeed;
    use std::sync::Arc;

    fn scheduler(
        feed: &FakeFeed,
        interval: Duration,
        cancel: CancellationToken,
    ) -> (SyncScheduler, SyncTrigger) {
        let store = MemoryStore::new();
        let shared: Arc<dyn FeedApi> = Arc::new(feed.clone());
        let pass = RepoBasedPass::new(
            shared.clone(),
            ChangeDetector::new(shared, &Config::default().feed, Duration::from_secs(1)),
            AffectedHostResolver::new(Arc::new(store.clone())),
            Arc::new(store),
            Arc::new(MemoryPublisher::new()),
            false,
        );
        SyncScheduler::new(pass, interval, cancel)
    }

    #[tokio::test(start_paused = true)]
    async fn runs_immediately_then_on_interval() {
        let feed = FakeFeed::new();
        let cancel = CancellationToken::new();
        let (scheduler, _trigger) = scheduler(&feed, Duration::from_secs(60), cancel.clone());
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(feed.requests().len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(feed.requests().len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_runs_pass_between_ticks() {
        let feed = FakeFeed::new();
        let cancel = CancellationToken::new();
        let (scheduler, trigger) = scheduler(&feed, Duration::from_secs(3600), cancel.clone());
        let handle = tokio::spawn(scheduler.run());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(trigger.request(), TriggerStatus::Queued);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(feed.requests().len(), 2);

        cancel.cancel();
        handle.await.unwrap();
        assert_eq!(trigger.request(), TriggerStatus::Stopped);
    }

    #[tokio::test]
    async fn pending_triggers_coalesce() {
        let feed = FakeFeed::new();
        let (_scheduler, trigger) =
            scheduler(&feed, Duration::from_secs(60), CancellationToken::new());

        assert_eq!(trigger.request(), TriggerStatus::Queued);
        assert_eq!(trigger.request(), TriggerStatus::AlreadyQueued);
    }
}

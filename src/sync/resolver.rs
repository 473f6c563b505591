//! Maps changed repositories to the hosts that must be re-evaluated.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::store::{self, HostStore};
use crate::types::EvaluationRequest;

pub struct AffectedHostResolver {
    store: Arc<dyn HostStore>,
}

impl AffectedHostResolver {
    pub fn new(store: Arc<dyn HostStore>) -> Self {
        AffectedHostResolver { store }
    }

    /// One request per distinct host using any of `repos`, ordered by account.
    /// An empty set resolves to nothing without querying the store.
    #[instrument(skip_all, fields(repos = repos.len()))]
    pub async fn resolve(&self, repos: &BTreeSet<String>) -> store::Result<Vec<EvaluationRequest>> {
        if repos.is_empty() {
            return Ok(Vec::new());
        }
        let requests = self.store.hosts_for_repos(repos).await?;
        debug!(hosts = requests.len(), "Resolved affected hosts");
        Ok(requests)
    }
}

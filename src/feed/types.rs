//! Request and response payloads of the metadata feed.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Feed endpoints used by this service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEndpoint {
    /// Paginated repository listing.
    Repos,
    /// Timestamps of the feed's last data export.
    DbChange,
}

impl FeedEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            FeedEndpoint::Repos => "repos",
            FeedEndpoint::DbChange => "dbchange",
        }
    }

    pub fn method(&self) -> reqwest::Method {
        match self {
            FeedEndpoint::Repos => reqwest::Method::POST,
            FeedEndpoint::DbChange => reqwest::Method::GET,
        }
    }
}

/// Body of a `POST /repos` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReposRequest {
    pub page: u32,
    pub page_size: u32,
    /// Repository name patterns.
    pub repository_list: Vec<String>,
    /// Include third-party repositories.
    pub third_party: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_since: Option<DateTime<Utc>>,
}

/// Attributes of one content set of a repository.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RepoAttributes {
    #[serde(default)]
    pub third_party: Option<bool>,

    /// Remaining attributes (arch, releasever, product, ...), kept opaque.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RepoAttributes {
    pub fn is_third_party(&self) -> bool {
        self.third_party == Some(true)
    }
}

/// One page of a `POST /repos` response.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ReposResponse {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
    /// Total number of pages for this query.
    #[serde(default)]
    pub pages: u32,
    #[serde(default)]
    pub repository_list: BTreeMap<String, Vec<RepoAttributes>>,
    /// Most recent repository change known to the feed. Absent when the feed
    /// has nothing matching.
    #[serde(default)]
    pub latest_repo_change: Option<DateTime<Utc>>,
}

/// Response of `GET /dbchange`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DbChange {
    /// When the feed last exported its data.
    pub exported: DateTime<Utc>,
    #[serde(default)]
    pub last_change: Option<DateTime<Utc>>,
}

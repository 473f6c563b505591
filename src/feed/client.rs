//! HTTP client for the metadata feed.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::config::FeedConfig;
use crate::retry::{BackoffPolicy, RetryError, call_with_retry};

use super::error::FeedError;
use super::types::{DbChange, FeedEndpoint, ReposRequest, ReposResponse};

/// Result of a feed call after retries.
pub type FeedResult<T> = Result<T, RetryError<FeedError>>;

/// Calls the change detector makes against the feed.
#[async_trait]
pub trait FeedApi: Send + Sync {
    /// Fetches one page of repositories.
    async fn repos_page(&self, request: &ReposRequest) -> FeedResult<ReposResponse>;

    /// Fetches the feed's export timestamps.
    async fn db_change(&self) -> FeedResult<DbChange>;
}

/// reqwest-backed feed client. Every call goes through the retry controller.
#[derive(Clone)]
pub struct FeedClient {
    http: reqwest::Client,
    base_url: String,
    retry: BackoffPolicy,
    retry_codes: Vec<u16>,
    http_debug: bool,
    cancel: CancellationToken,
}

impl FeedClient {
    /// Builds a client from configuration. `cancel` aborts retry waits.
    pub fn new(config: &FeedConfig, cancel: CancellationToken) -> Result<Self, FeedError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(FeedClient {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            retry: config.retry,
            retry_codes: config.retry_codes.clone(),
            http_debug: config.http_debug,
            cancel,
        })
    }

    fn url(&self, endpoint: FeedEndpoint) -> String {
        format!("{}/{}", self.base_url, endpoint.path())
    }

    /// One attempt, no retries. Non-2xx statuses become [`FeedError::Status`].
    async fn send_once<Req, Resp>(
        &self,
        endpoint: FeedEndpoint,
        body: Option<&Req>,
    ) -> Result<Resp, FeedError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let mut request = self.http.request(endpoint.method(), self.url(endpoint));
        if let Some(body) = body {
            if self.http_debug {
                let dump = serde_json::to_string(body).unwrap_or_default();
                trace!(endpoint = endpoint.path(), body = %dump, "http call");
            }
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if self.http_debug {
            trace!(
                endpoint = endpoint.path(),
                status = status.as_u16(),
                body = %String::from_utf8_lossy(&bytes),
                "http response"
            );
        }

        if !status.is_success() {
            return Err(FeedError::status(status.as_u16(), &bytes));
        }

        serde_json::from_slice(&bytes).map_err(|source| FeedError::Decode {
            endpoint: endpoint.path(),
            source,
        })
    }

    async fn call<Req, Resp>(&self, endpoint: FeedEndpoint, body: Option<&Req>) -> FeedResult<Resp>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        call_with_retry(&self.retry, &self.cancel, &self.retry_codes, || {
            self.send_once(endpoint, body)
        })
        .await
    }
}

#[async_trait]
impl FeedApi for FeedClient {
    #[instrument(skip(self, request), fields(page = request.page))]
    async fn repos_page(&self, request: &ReposRequest) -> FeedResult<ReposResponse> {
        let response: ReposResponse = self.call(FeedEndpoint::Repos, Some(request)).await?;
        debug!(
            pages = response.pages,
            count = response.repository_list.len(),
            "Fetched repos page"
        );
        Ok(response)
    }

    #[instrument(skip(self))]
    async fn db_change(&self) -> FeedResult<DbChange> {
        self.call::<(), DbChange>(FeedEndpoint::DbChange, None).await
    }
}

impl std::fmt::Debug for FeedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedClient")
            .field("base_url", &self.base_url)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::Json;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Serves `router` on an ephemeral port and returns its base URL.
    async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(url: String, retry_codes: Vec<u16>) -> FeedClient {
        let mut config = Config::default().feed;
        config.url = url;
        config.retry = BackoffPolicy::constant(Some(3)).with_interval(Duration::from_millis(5));
        config.retry_codes = retry_codes;
        FeedClient::new(&config, CancellationToken::new()).unwrap()
    }

    fn page_one() -> ReposRequest {
        ReposRequest {
            page: 1,
            page_size: 10,
            repository_list: vec![".*".to_string()],
            third_party: true,
            modified_since: None,
        }
    }

    #[tokio::test]
    async fn fetches_and_decodes_repos_page() {
        let router = axum::Router::new().route(
            "/repos",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["page"], 1);
                assert_eq!(body["third_party"], true);
                Json(serde_json::json!({
                    "page": 1,
                    "pages": 1,
                    "repository_list": {"rhel-9-appstream": [{"third_party": false}]},
                    "latest_repo_change": "2024-03-01T10:00:00+00:00"
                }))
            }),
        );
        let client = client_for(serve(router).await, vec![]);

        let page = client.repos_page(&page_one()).await.unwrap();
        assert_eq!(page.pages, 1);
        assert!(page.repository_list.contains_key("rhel-9-appstream"));
        assert!(page.latest_repo_change.is_some());
    }

    #[tokio::test]
    async fn retries_listed_status_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let router = axum::Router::new().route(
            "/dbchange",
            get(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(StatusCode::SERVICE_UNAVAILABLE)
                    } else {
                        Ok(Json(serde_json::json!({"exported": "2024-03-01T10:00:00Z"})))
                    }
                }
            }),
        );
        let client = client_for(serve(router).await, vec![503]);

        let change = client.db_change().await.unwrap();
        assert_eq!(change.exported.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unlisted_status_fails_without_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let router = axum::Router::new().route(
            "/repos",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { StatusCode::BAD_REQUEST }
            }),
        );
        let client = client_for(serve(router).await, vec![503]);

        let err = client.repos_page(&page_one()).await.unwrap_err();
        assert_eq!(err.status_code(), Some(400));
        assert_eq!(err.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn undecodable_body_is_retried_under_blanket_policy() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let router = axum::Router::new().route(
            "/repos",
            post(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { "not json" }
            }),
        );
        let client = client_for(serve(router).await, vec![]);

        let err = client.repos_page(&page_one()).await.unwrap_err();
        assert!(matches!(
            err,
            RetryError::Exhausted {
                attempts: 3,
                last_error: FeedError::Decode { .. }
            }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn url_joins_without_double_slash() {
        let client = client_for("http://feed/api/v3/".to_string(), vec![]);
        assert_eq!(client.url(FeedEndpoint::Repos), "http://feed/api/v3/repos");
    }
}

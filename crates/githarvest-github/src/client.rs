use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::pool::{CredentialPool, Lease};

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("githarvest/", env!("CARGO_PKG_VERSION"));

/// One page of repository search results. Items stay as raw JSON; the
/// normalization layer turns them into records so cached payloads take the
/// same path as fresh ones.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchPage {
    pub total_count: u64,
    #[serde(default)]
    pub incomplete_results: bool,
    pub items: Vec<serde_json::Value>,
}

impl SearchPage {
    pub fn parse(body: &str) -> Result<Self> {
        Ok(serde_json::from_str(body)?)
    }
}

/// Thin REST client over the credential pool. Every response, success or
/// failure, feeds its rate headers back into the pool before the status is
/// even looked at.
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    pool: Arc<CredentialPool>,
}

impl GitHubClient {
    pub fn new(pool: Arc<CredentialPool>) -> Result<Self> {
        Self::with_base_url(pool, DEFAULT_BASE_URL.to_string())
    }

    pub fn with_base_url(pool: Arc<CredentialPool>, base_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            http,
            base_url,
            pool,
        })
    }

    /// Raw body of one repository search page (1-based page index).
    pub async fn search_repositories(
        &self,
        query: &str,
        page: u32,
        per_page: u32,
    ) -> Result<String> {
        self.get_raw(
            "/search/repositories",
            &[
                ("q", query.to_string()),
                ("sort", "stars".to_string()),
                ("order", "desc".to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
            ],
        )
        .await
    }

    /// Trial count for the partitioner: `total_count` for a query, fetched
    /// with the smallest possible page.
    pub async fn search_count(&self, query: &str) -> Result<u64> {
        let body = self
            .get_raw(
                "/search/repositories",
                &[("q", query.to_string()), ("per_page", "1".to_string())],
            )
            .await?;
        let page = SearchPage::parse(&body)?;
        if page.incomplete_results {
            debug!(query, "search reported incomplete results");
        }
        Ok(page.total_count)
    }

    pub async fn get_user(&self, login: &str) -> Result<String> {
        self.get_raw(&format!("/users/{}", login), &[]).await
    }

    pub async fn get_org(&self, login: &str) -> Result<String> {
        self.get_raw(&format!("/orgs/{}", login), &[]).await
    }

    pub async fn list_contributors(&self, full_name: &str, per_page: u32) -> Result<String> {
        self.get_raw(
            &format!("/repos/{}/contributors", full_name),
            &[("per_page", per_page.to_string())],
        )
        .await
    }

    pub async fn list_user_orgs(&self, login: &str) -> Result<String> {
        self.get_raw(&format!("/users/{}/orgs", login), &[]).await
    }

    async fn get_raw(&self, path: &str, query: &[(&str, String)]) -> Result<String> {
        let lease = self.pool.acquire().await;

        let response = self
            .http
            .get(format!("{}{}", self.base_url, path))
            .header("authorization", format!("Bearer {}", lease.token()))
            .header("accept", "application/vnd.github+json")
            .query(query)
            .send()
            .await?;

        // Headers are authoritative even on error responses.
        let remaining = update_lease(&lease, response.headers());

        let status = response.status();
        if status.as_u16() == 429 || (status.as_u16() == 403 && remaining == Some(0)) {
            warn!(credential = lease.credential_id(), "rate limited");
            return Err(Error::RateLimited);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.text().await?)
    }
}

/// Parse `X-RateLimit-Remaining` / `X-RateLimit-Reset` and push them into the
/// lease. Returns the remaining count when present.
fn update_lease(lease: &Lease, headers: &HeaderMap) -> Option<i64> {
    let remaining = header_i64(headers, "x-ratelimit-remaining")?;
    let reset_at = header_i64(headers, "x-ratelimit-reset")
        .and_then(|epoch| Utc.timestamp_opt(epoch, 0).single())
        .unwrap_or_else(|| Utc::now() + chrono::Duration::seconds(60));
    lease.update(remaining, reset_at);
    Some(remaining)
}

fn header_i64(headers: &HeaderMap, name: &str) -> Option<i64> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn client(server: &mockito::ServerGuard) -> GitHubClient {
        let pool = Arc::new(CredentialPool::new(vec!["test-token".to_string()]).unwrap());
        GitHubClient::with_base_url(pool, server.url()).unwrap()
    }

    #[tokio::test]
    async fn test_quota_headers_update_pool() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/users/octocat")
            .with_status(200)
            .with_header("x-ratelimit-remaining", "17")
            .with_header("x-ratelimit-reset", "1999999999")
            .with_body(r#"{"id": 583231, "login": "octocat"}"#)
            .create_async()
            .await;

        let pool = Arc::new(CredentialPool::new(vec!["test-token".to_string()]).unwrap());
        let client = GitHubClient::with_base_url(Arc::clone(&pool), server.url()).unwrap();

        let body = client.get_user("octocat").await.unwrap();
        assert!(body.contains("octocat"));
        assert_eq!(pool.stats()[0].remaining, 17);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_search_sends_pagination_params() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search/repositories")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("q".into(), "stars:10..20".into()),
                Matcher::UrlEncoded("page".into(), "3".into()),
                Matcher::UrlEncoded("per_page".into(), "100".into()),
            ]))
            .with_status(200)
            .with_header("x-ratelimit-remaining", "29")
            .with_body(r#"{"total_count": 0, "incomplete_results": false, "items": []}"#)
            .create_async()
            .await;

        let client = client(&server);
        let body = client.search_repositories("stars:10..20", 3, 100).await.unwrap();
        let page = SearchPage::parse(&body).unwrap();
        assert_eq!(page.total_count, 0);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_not_found_maps_to_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/ghost")
            .with_status(404)
            .with_header("x-ratelimit-remaining", "28")
            .with_body(r#"{"message": "Not Found"}"#)
            .create_async()
            .await;

        let client = client(&server);
        match client.get_user("ghost").await {
            Err(Error::ApiError { status, .. }) => assert_eq!(status, 404),
            other => panic!("expected ApiError, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_secondary_rate_limit_detected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/users/busy")
            .with_status(403)
            .with_header("x-ratelimit-remaining", "0")
            .with_header("x-ratelimit-reset", "1999999999")
            .with_body(r#"{"message": "API rate limit exceeded"}"#)
            .create_async()
            .await;

        let client = client(&server);
        assert!(matches!(
            client.get_user("busy").await,
            Err(Error::RateLimited)
        ));
    }

    #[tokio::test]
    async fn test_search_count_extracts_total() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/search/repositories")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("x-ratelimit-remaining", "29")
            .with_body(r#"{"total_count": 4321, "incomplete_results": false, "items": []}"#)
            .create_async()
            .await;

        let client = client(&server);
        assert_eq!(client.search_count("stars:>100").await.unwrap(), 4321);
    }
}

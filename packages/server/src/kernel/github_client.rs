use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;

use super::retry::HttpStatusError;
use super::BaseCommitHistorySource;

const GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub REST client for commit history
pub struct GithubCommitsClient {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl GithubCommitsClient {
    pub fn new(token: Option<String>, timeout: Duration) -> Result<Self> {
        Self::with_base_url(GITHUB_API_URL, token, timeout)
    }

    /// Point the client at another host (GitHub Enterprise, test servers).
    pub fn with_base_url(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("webhook-pipeline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        })
    }
}

#[async_trait]
impl BaseCommitHistorySource for GithubCommitsClient {
    async fn fetch_recent_commits(&self, repository: &str, limit: u32) -> Result<Vec<Value>> {
        let url = format!("{}/repos/{}/commits", self.base_url, repository);

        let mut request = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .query(&[("per_page", limit.clamp(1, 100))]);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HttpStatusError {
                status: status.as_u16(),
            })
            .with_context(|| format!("GitHub commits request failed for {}", repository));
        }

        let commits: Vec<Value> = response
            .json()
            .await
            .context("Failed to parse GitHub commits response")?;

        Ok(commits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::retry::is_transient;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_fetches_commits_with_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/api/commits"))
            .and(query_param("per_page", "5"))
            .and(header("authorization", "Bearer t0ken"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"sha": "abc"},
                {"sha": "def"}
            ])))
            .mount(&server)
            .await;

        let client = GithubCommitsClient::with_base_url(
            server.uri(),
            Some("t0ken".into()),
            Duration::from_secs(2),
        )
        .unwrap();

        let commits = client.fetch_recent_commits("acme/api", 5).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[0]["sha"], "abc");
    }

    #[tokio::test]
    async fn test_status_errors_are_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/missing/commits"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/repos/acme/flaky/commits"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let client =
            GithubCommitsClient::with_base_url(server.uri(), None, Duration::from_secs(2)).unwrap();

        let missing = client.fetch_recent_commits("acme/missing", 5).await.unwrap_err();
        assert!(!is_transient(&missing));

        let flaky = client.fetch_recent_commits("acme/flaky", 5).await.unwrap_err();
        assert!(is_transient(&flaky));
    }
}

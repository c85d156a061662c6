//! GitHub REST client for check runs and rate-limit probing.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::cache::EtagCache;
use crate::checks::{evaluate_check_runs, CheckRun, CommitChecker};

pub const DEFAULT_API_URL: &str = "https://api.github.com";

const API_VERSION: &str = "2022-11-28";
const PAGE_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct CheckRunsPage {
    total_count: usize,
    check_runs: Vec<CheckRun>,
}

/// Request quota reported by `GET /rate_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: u64,
    #[serde(default)]
    pub used: u64,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    rate: RateLimit,
}

pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_url: String,
    token: String,
}

impl GitHubClient {
    /// Create a client authenticating with a personal access token.
    ///
    /// With `enable_caching`, GET responses are cached by ETag for the life
    /// of the client.
    pub fn new(token: impl Into<String>, api_url: &str, enable_caching: bool) -> Result<Self> {
        Ok(Self {
            client: create_github_client(enable_caching)?,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(query)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .with_context(|| format!("Failed to send request to {}", url))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("GitHub API error: {} - {}", status, error_text));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse response from {}", url))
    }

    /// Every check run for `sha` in `repo` (`org/name`), following pagination.
    pub async fn list_check_runs(&self, repo: &str, sha: &str) -> Result<Vec<CheckRun>> {
        let url = format!("{}/repos/{}/commits/{}/check-runs", self.api_url, repo, sha);
        let mut runs = Vec::new();
        let mut page = 1usize;

        loop {
            let body: CheckRunsPage = self
                .get_json(
                    &url,
                    &[("per_page", PAGE_SIZE.to_string()), ("page", page.to_string())],
                )
                .await?;

            let fetched = body.check_runs.len();
            runs.extend(body.check_runs);
            debug!(
                "Fetched page {} of check runs for {}@{}: {} runs ({} of {})",
                page,
                repo,
                sha,
                fetched,
                runs.len(),
                body.total_count
            );

            if fetched == 0 || runs.len() >= body.total_count {
                break;
            }
            page += 1;
        }

        Ok(runs)
    }

    pub async fn rate_limit(&self) -> Result<RateLimit> {
        let url = format!("{}/rate_limit", self.api_url);
        let body: RateLimitResponse = self.get_json(&url, &[]).await?;
        Ok(body.rate)
    }
}

#[async_trait]
impl CommitChecker for GitHubClient {
    async fn commit_passed_checks(
        &self,
        required_patterns: &[String],
        repo: &str,
        commit_sha: &str,
    ) -> Result<bool> {
        if required_patterns.is_empty() {
            return Ok(true);
        }

        info!("Fetching check runs for {}@{}", repo, commit_sha);
        let runs = self.list_check_runs(repo, commit_sha).await?;
        evaluate_check_runs(required_patterns, &runs)
            .with_context(|| format!("Invalid check pattern for {}", repo))
    }

    async fn health_check(&self) -> bool {
        match self.rate_limit().await {
            Ok(rate) => {
                if rate.remaining < 1 {
                    warn!("GitHub rate limit exhausted (resets at {})", rate.reset);
                }
                rate.remaining >= 1
            }
            Err(e) => {
                warn!("GitHub health check failed: {:#}", e);
                false
            }
        }
    }
}

/// Build the HTTP client used for GitHub, optionally with ETag caching.
pub fn create_github_client(enable_caching: bool) -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("checkgate/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to create HTTP client")?;

    let mut builder = ClientBuilder::new(client);
    if enable_caching {
        builder = builder.with_arc(Arc::new(EtagCache::new()));
    }

    Ok(builder.build())
}

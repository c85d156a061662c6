//! Conditional-request caching for GitHub API calls.
//!
//! GitHub does not count `304 Not Modified` responses against the rate limit,
//! so remembering the ETag of each GET and replaying the stored body on a 304
//! keeps repeated lookups of the same commit cheap.

use std::collections::HashMap;
use std::sync::RwLock;

use http::header::{ETAG, IF_NONE_MATCH};
use http::{HeaderMap, StatusCode};
use reqwest::{Method, Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CachedResponse {
    etag: String,
    status: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl CachedResponse {
    fn to_response(&self) -> Response {
        let mut response = http::Response::new(self.body.clone());
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        Response::from(response)
    }
}

/// In-process ETag cache, installed as `reqwest` middleware.
#[derive(Debug, Default)]
pub struct EtagCache {
    entries: RwLock<HashMap<String, CachedResponse>>,
}

impl EtagCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached responses.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: &str) -> Option<CachedResponse> {
        self.entries.read().ok()?.get(key).cloned()
    }

    fn store(&self, key: String, entry: CachedResponse) {
        match self.entries.write() {
            Ok(mut entries) => {
                entries.insert(key, entry);
            }
            Err(_) => warn!("ETag cache lock poisoned, not caching response"),
        }
    }
}

#[async_trait::async_trait]
impl Middleware for EtagCache {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        if req.method() != Method::GET {
            return next.run(req, extensions).await;
        }

        let key = req.url().to_string();
        let cached = self.lookup(&key);

        if let Some(entry) = &cached {
            if let Ok(value) = entry.etag.parse() {
                req.headers_mut().insert(IF_NONE_MATCH, value);
            }
        }

        let response = next.run(req, extensions).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            if let Some(entry) = cached {
                debug!("ETag cache hit for {}", key);
                return Ok(entry.to_response());
            }
            return Ok(response);
        }

        let etag = response
            .headers()
            .get(ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let Some(etag) = etag.filter(|_| response.status().is_success()) else {
            return Ok(response);
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        let entry = CachedResponse {
            etag,
            status,
            headers,
            body,
        };
        let replay = entry.to_response();
        self.store(key, entry);

        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::test_utils::MockGitHub;

    fn client(cache: Arc<EtagCache>) -> reqwest_middleware::ClientWithMiddleware {
        reqwest_middleware::ClientBuilder::new(reqwest::Client::new())
            .with_arc(cache)
            .build()
    }

    #[tokio::test]
    async fn test_second_request_is_served_from_cache() {
        let mock = MockGitHub::start("token").await;
        mock.add_check_run("org/repo", "abc", "build", "completed", Some("success"));
        let cache = Arc::new(EtagCache::new());
        let client = client(cache.clone());
        let url = format!("{}/repos/org/repo/commits/abc/check-runs", mock.url());

        let first = client
            .get(&url)
            .bearer_auth("token")
            .send()
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);
        let first_body = first.text().await.unwrap();
        assert_eq!(cache.len(), 1);

        let second = client
            .get(&url)
            .bearer_auth("token")
            .send()
            .await
            .unwrap();
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(second.text().await.unwrap(), first_body);

        assert_eq!(mock.not_modified_count(), 1);
        assert_eq!(mock.check_run_request_count(), 2);
    }

    #[tokio::test]
    async fn test_changed_resource_replaces_entry() {
        let mock = MockGitHub::start("token").await;
        mock.add_check_run("org/repo", "abc", "build", "in_progress", None);
        let cache = Arc::new(EtagCache::new());
        let client = client(cache.clone());
        let url = format!("{}/repos/org/repo/commits/abc/check-runs", mock.url());

        let first: serde_json::Value = client
            .get(&url)
            .bearer_auth("token")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(first["check_runs"][0]["status"], "in_progress");

        mock.add_check_run("org/repo", "abc", "lint", "completed", Some("success"));

        let second: serde_json::Value = client
            .get(&url)
            .bearer_auth("token")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(second["total_count"], 2);
        assert_eq!(mock.not_modified_count(), 0);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_error_responses_are_not_cached() {
        let mock = MockGitHub::start("token").await;
        let cache = Arc::new(EtagCache::new());
        let client = client(cache.clone());
        let url = format!("{}/repos/org/repo/commits/abc/check-runs", mock.url());

        let response = client
            .get(&url)
            .bearer_auth("wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(cache.is_empty());
    }
}

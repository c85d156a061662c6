//! A local stand-in for the parts of the GitHub REST API the crate talks to.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

#[derive(Default)]
struct MockState {
    token: String,
    /// Check runs per `org/repo@sha`.
    runs: Mutex<HashMap<String, Vec<Value>>>,
    max_page_size: AtomicUsize,
    rate_limit_remaining: AtomicUsize,
    rate_limit_fails: AtomicBool,
    check_run_requests: AtomicUsize,
    not_modified: AtomicUsize,
    rate_limit_requests: AtomicUsize,
}

impl MockState {
    fn authorized(&self, headers: &HeaderMap) -> bool {
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(format!("Bearer {}", self.token).as_str())
    }
}

/// Handle to a running mock server. The server lives as long as the runtime.
#[derive(Clone)]
pub struct MockGitHub {
    url: String,
    state: Arc<MockState>,
}

impl MockGitHub {
    pub async fn start(token: &str) -> Self {
        let state = Arc::new(MockState {
            token: token.to_string(),
            max_page_size: AtomicUsize::new(100),
            rate_limit_remaining: AtomicUsize::new(5000),
            ..Default::default()
        });

        let app = Router::new()
            .route(
                "/repos/{owner}/{repo}/commits/{sha}/check-runs",
                get(check_runs_handler),
            )
            .route("/rate_limit", get(rate_limit_handler))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            state,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn add_check_run(
        &self,
        repo: &str,
        sha: &str,
        name: &str,
        status: &str,
        conclusion: Option<&str>,
    ) {
        let mut runs = self.state.runs.lock().unwrap();
        let entry = runs.entry(format!("{}@{}", repo, sha)).or_default();
        let id = entry.len() as u64 + 1;
        entry.push(json!({
            "id": id,
            "name": name,
            "head_sha": sha,
            "status": status,
            "conclusion": conclusion,
        }));
    }

    pub fn set_max_page_size(&self, size: usize) {
        self.state.max_page_size.store(size, Ordering::SeqCst);
    }

    pub fn set_rate_limit_remaining(&self, remaining: usize) {
        self.state
            .rate_limit_remaining
            .store(remaining, Ordering::SeqCst);
    }

    pub fn set_rate_limit_fails(&self, fails: bool) {
        self.state.rate_limit_fails.store(fails, Ordering::SeqCst);
    }

    pub fn check_run_request_count(&self) -> usize {
        self.state.check_run_requests.load(Ordering::SeqCst)
    }

    pub fn not_modified_count(&self) -> usize {
        self.state.not_modified.load(Ordering::SeqCst)
    }

    pub fn rate_limit_request_count(&self) -> usize {
        self.state.rate_limit_requests.load(Ordering::SeqCst)
    }
}

#[derive(Deserialize)]
struct PageQuery {
    per_page: Option<usize>,
    page: Option<usize>,
}

async fn check_runs_handler(
    State(state): State<Arc<MockState>>,
    Path((owner, repo, sha)): Path<(String, String, String)>,
    Query(query): Query<PageQuery>,
    headers: HeaderMap,
) -> Response {
    state.check_run_requests.fetch_add(1, Ordering::SeqCst);

    if !state.authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Bad credentials"})),
        )
            .into_response();
    }

    let runs = state
        .runs
        .lock()
        .unwrap()
        .get(&format!("{}/{}@{}", owner, repo, sha))
        .cloned()
        .unwrap_or_default();

    let per_page = query
        .per_page
        .unwrap_or(30)
        .min(state.max_page_size.load(Ordering::SeqCst))
        .max(1);
    let page = query.page.unwrap_or(1).max(1);
    let page_runs: Vec<Value> = runs
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .cloned()
        .collect();

    let body = json!({
        "total_count": runs.len(),
        "check_runs": page_runs,
    })
    .to_string();

    let mut hasher = DefaultHasher::new();
    body.hash(&mut hasher);
    let etag = format!("\"{:x}\"", hasher.finish());

    let matches = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some(etag.as_str());
    if matches {
        state.not_modified.fetch_add(1, Ordering::SeqCst);
        return (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response();
    }

    (
        StatusCode::OK,
        [
            (header::ETAG, etag),
            (header::CONTENT_TYPE, "application/json".to_string()),
        ],
        body,
    )
        .into_response()
}

async fn rate_limit_handler(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
) -> Response {
    state.rate_limit_requests.fetch_add(1, Ordering::SeqCst);

    if state.rate_limit_fails.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"message": "Server Error"})),
        )
            .into_response();
    }
    if !state.authorized(&headers) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({"message": "Bad credentials"})),
        )
            .into_response();
    }

    let remaining = state.rate_limit_remaining.load(Ordering::SeqCst);
    Json(json!({
        "resources": {
            "core": {"limit": 5000, "remaining": remaining, "reset": 1700000000, "used": 5000usize.saturating_sub(remaining)}
        },
        "rate": {"limit": 5000, "remaining": remaining, "reset": 1700000000, "used": 5000usize.saturating_sub(remaining)}
    }))
    .into_response()
}

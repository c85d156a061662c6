use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use checkgate_core::CommitChecker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    Pass,
    Fail,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckCall {
    pub patterns: Vec<String>,
    pub repo: String,
    pub sha: String,
}

/// A `CommitChecker` with a fixed answer that records how it was called.
pub struct FakeChecker {
    outcome: CheckOutcome,
    healthy: AtomicBool,
    calls: Mutex<Vec<CheckCall>>,
}

impl FakeChecker {
    pub fn new(outcome: CheckOutcome) -> Self {
        Self {
            outcome,
            healthy: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<CheckCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl CommitChecker for FakeChecker {
    async fn commit_passed_checks(
        &self,
        required_patterns: &[String],
        repo: &str,
        commit_sha: &str,
    ) -> Result<bool> {
        self.calls.lock().unwrap().push(CheckCall {
            patterns: required_patterns.to_vec(),
            repo: repo.to_string(),
            sha: commit_sha.to_string(),
        });
        match self.outcome {
            CheckOutcome::Pass => Ok(true),
            CheckOutcome::Fail => Ok(false),
            CheckOutcome::Error => Err(anyhow!("GitHub API error: 502 Bad Gateway")),
        }
    }

    async fn health_check(&self) -> bool {
        self.healthy.load(Ordering::SeqCst)
    }
}

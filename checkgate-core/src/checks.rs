//! Evaluation of GitHub check runs against required name patterns.

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::info;

/// Lifecycle status of a check run as reported by GitHub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Queued,
    InProgress,
    Completed,
    Waiting,
    Requested,
    Pending,
    #[serde(other)]
    Unknown,
}

/// Final outcome of a completed check run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckConclusion {
    Success,
    Failure,
    Neutral,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Stale,
    StartupFailure,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    pub status: CheckStatus,
    pub conclusion: Option<CheckConclusion>,
}

impl CheckRun {
    /// True only for a run that has completed with a success conclusion.
    pub fn is_successful(&self) -> bool {
        self.status == CheckStatus::Completed && self.conclusion == Some(CheckConclusion::Success)
    }
}

/// Something that can decide whether a commit passed its required checks.
#[async_trait]
pub trait CommitChecker: Send + Sync {
    /// Evaluate `required_patterns` against the check runs of `commit_sha`
    /// in `repo` (`org/name`).
    async fn commit_passed_checks(
        &self,
        required_patterns: &[String],
        repo: &str,
        commit_sha: &str,
    ) -> Result<bool>;

    /// Whether the provider is reachable and has request quota left.
    /// Never errors.
    async fn health_check(&self) -> bool;
}

/// Compile a check pattern so that it only matches at the start of a name.
pub fn compile_check_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})", pattern))
}

/// Decide whether `runs` satisfy every pattern in `patterns`.
///
/// Patterns are evaluated in order. A pattern with no matching run passes.
/// The first matched run that is not completed-with-success fails the whole
/// evaluation; nothing after it is looked at, so later patterns are not even
/// compiled.
pub fn evaluate_check_runs(patterns: &[String], runs: &[CheckRun]) -> Result<bool, regex::Error> {
    for pattern in patterns {
        info!("Validating check runs for regex \"{}\"", pattern);
        let regex = compile_check_pattern(pattern)?;

        let mut matched = runs
            .iter()
            .filter(|run| regex.is_match(&run.name))
            .peekable();

        if matched.peek().is_none() {
            info!("No check run found for regex \"{}\"", pattern);
            continue;
        }

        for run in matched {
            info!(
                "Check \"{}\" matched \"{}\", validating...",
                run.name, pattern
            );
            if !run.is_successful() {
                info!(
                    "Check \"{}\" failed with conclusion {:?} and status {:?} on regex \"{}\"",
                    run.name, run.conclusion, run.status, pattern
                );
                return Ok(false);
            }
        }

        info!("Check for regex \"{}\" passed", pattern);
    }

    Ok(true)
}

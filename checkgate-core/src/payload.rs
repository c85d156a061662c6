//! Wire model for the Argo CD plugin generator protocol.
//!
//! A generator request carries one of two data shapes, selected by
//! `sourceGeneratorType`: the `scm` shape produced by the SCM provider
//! generator and the `pr` shape produced by the pull request generator.
//! Both shapes are open records; unknown fields are kept verbatim and
//! echoed back in the parameter set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::checks::compile_check_pattern;
use crate::store::ApplicationKey;

/// Ordered string-keyed parameter map handed back to the caller.
pub type ParameterSet = Map<String, Value>;

/// Separator used when building a fingerprint.
pub const FINGERPRINT_SEPARATOR: &str = "+";

const GITHUB_HTTPS_PREFIX: &str = "https://github.com/";

/// Body of `POST /api/v1/getparams.execute`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratorRequest {
    pub application_set_name: String,
    pub input: GeneratorInput,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorInput {
    pub parameters: GeneratorParameters,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "sourceGeneratorType")]
pub enum GeneratorParameters {
    #[serde(rename = "scm")]
    Scm {
        checks_regex: Vec<String>,
        data: ScmData,
    },
    #[serde(rename = "pr")]
    PullRequest {
        checks_regex: Vec<String>,
        data: PullRequestData,
    },
}

/// Data emitted by the SCM provider generator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScmData {
    pub organization: String,
    pub repository: String,
    pub branch: String,
    pub sha: String,
    #[serde(flatten)]
    pub extra: ParameterSet,
}

/// Data emitted by the pull request generator.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PullRequestData {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub branch: String,
    pub head_sha: String,
    #[serde(flatten)]
    pub extra: ParameterSet,
}

impl ScmData {
    /// Rebuild the record as it was received.
    pub fn to_state(&self) -> ParameterSet {
        let mut state = ParameterSet::new();
        state.insert("organization".into(), self.organization.clone().into());
        state.insert("repository".into(), self.repository.clone().into());
        state.insert("branch".into(), self.branch.clone().into());
        state.insert("sha".into(), self.sha.clone().into());
        state.extend(self.extra.clone());
        state
    }
}

impl PullRequestData {
    /// Rebuild the record as it was received.
    pub fn to_state(&self) -> ParameterSet {
        let mut state = ParameterSet::new();
        state.insert("repoURL".into(), self.repo_url.clone().into());
        state.insert("branch".into(), self.branch.clone().into());
        state.insert("head_sha".into(), self.head_sha.clone().into());
        state.extend(self.extra.clone());
        state
    }
}

/// Organization and repository name of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RepoCoordinates {
    pub organization: String,
    pub repository: String,
}

impl RepoCoordinates {
    pub fn new(organization: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            repository: repository.into(),
        }
    }

    /// Derive coordinates from a clone URL.
    ///
    /// Accepts `https://github.com/org/repo(.git)` and SSH-style
    /// `git@host:org/repo(.git)`. Returns `None` when either part would be empty.
    pub fn from_repo_url(url: &str) -> Option<Self> {
        let (organization, last) = if let Some(path) = url.strip_prefix(GITHUB_HTTPS_PREFIX) {
            if !path.contains('/') {
                return None;
            }
            let mut segments = url.rsplit('/');
            let last = segments.next()?;
            let organization = segments.next()?;
            (organization, last)
        } else {
            let (_, path) = url.split_once(':')?;
            let (organization, _) = path.split_once('/')?;
            let last = path.rsplit('/').next()?;
            (organization, last)
        };

        let repository = last.strip_suffix(".git").unwrap_or(last);
        if organization.is_empty() || repository.is_empty() {
            return None;
        }

        Some(Self::new(organization, repository))
    }

    /// `org/name` form used by the GitHub API.
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.organization, self.repository)
    }
}

/// A request field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}: {}", .location.join("."), .message)]
pub struct ValidationError {
    pub location: Vec<String>,
    pub message: String,
}

impl ValidationError {
    fn new(location: &[&str], message: impl Into<String>) -> Self {
        Self {
            location: location.iter().map(|s| s.to_string()).collect(),
            message: message.into(),
        }
    }
}

/// A generator request normalized to the fields the decision logic needs.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub application_set_name: String,
    pub coordinates: RepoCoordinates,
    pub branch: String,
    pub sha: String,
    pub checks: Vec<String>,
    pub state: ParameterSet,
}

impl GeneratorRequest {
    /// Validate the request and normalize either data shape.
    pub fn resolve(self) -> Result<ResolvedRequest, ValidationError> {
        let (checks, coordinates, branch, sha, state) = match self.input.parameters {
            GeneratorParameters::Scm { checks_regex, data } => {
                let state = data.to_state();
                let coordinates = RepoCoordinates::new(data.organization, data.repository);
                (checks_regex, coordinates, data.branch, data.sha, state)
            }
            GeneratorParameters::PullRequest { checks_regex, data } => {
                let state = data.to_state();
                let coordinates = RepoCoordinates::from_repo_url(&data.repo_url).ok_or_else(|| {
                    ValidationError::new(
                        &["input", "parameters", "data", "repoURL"],
                        format!(
                            "cannot derive organization and repository from '{}'",
                            data.repo_url
                        ),
                    )
                })?;
                (checks_regex, coordinates, data.branch, data.head_sha, state)
            }
        };

        validate_checks(&checks)?;

        Ok(ResolvedRequest {
            application_set_name: self.application_set_name,
            coordinates,
            branch,
            sha,
            checks,
            state,
        })
    }
}

fn validate_checks(checks: &[String]) -> Result<(), ValidationError> {
    if checks.is_empty() {
        return Err(ValidationError::new(
            &["input", "parameters", "checks_regex"],
            "at least one check pattern is required",
        ));
    }

    for (index, pattern) in checks.iter().enumerate() {
        if let Err(e) = compile_check_pattern(pattern) {
            let position = index.to_string();
            return Err(ValidationError::new(
                &["input", "parameters", "checks_regex", position.as_str()],
                format!("invalid regular expression '{}': {}", pattern, e),
            ));
        }
    }

    Ok(())
}

/// Join a commit SHA and the required check patterns into a cache token.
pub fn fingerprint(sha: &str, checks: &[String]) -> String {
    std::iter::once(sha)
        .chain(checks.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(FINGERPRINT_SEPARATOR)
}

impl ResolvedRequest {
    pub fn fingerprint(&self) -> String {
        fingerprint(&self.sha, &self.checks)
    }

    /// Store identity of the application this request describes.
    pub fn key(&self) -> ApplicationKey {
        ApplicationKey::new(
            self.application_set_name.clone(),
            self.coordinates.repository.clone(),
            self.branch.clone(),
        )
    }
}

/// Body returned to the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorResponse {
    pub output: GeneratorOutput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratorOutput {
    pub parameters: Vec<ParameterSet>,
}

impl GeneratorResponse {
    pub fn empty() -> Self {
        Self {
            output: GeneratorOutput {
                parameters: Vec::new(),
            },
        }
    }

    pub fn single(state: ParameterSet) -> Self {
        Self {
            output: GeneratorOutput {
                parameters: vec![state],
            },
        }
    }
}

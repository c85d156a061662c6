pub mod cache;
pub mod checks;
pub mod github;
pub mod payload;
pub mod store;

#[cfg(test)]
mod test_utils;

pub use cache::EtagCache;
pub use checks::{CheckConclusion, CheckRun, CheckStatus, CommitChecker};
pub use github::{GitHubClient, RateLimit, DEFAULT_API_URL};
pub use payload::{
    fingerprint, GeneratorRequest, GeneratorResponse, ParameterSet, RepoCoordinates,
    ResolvedRequest, ValidationError,
};
pub use store::{
    ApplicationKey, ApplicationRecord, ApplicationStore, RecordId, SqliteStore, StoreError,
};

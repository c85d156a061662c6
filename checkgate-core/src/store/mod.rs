//! Persistence for the last known-good state of each application.
//!
//! This module defines the `ApplicationStore` trait that abstracts storage of
//! application records, keyed by `(application_set_name, repository, branch)`.
//! `SqliteStore` is the durable implementation.

mod sqlite;

pub use sqlite::SqliteStore;

use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::payload::ParameterSet;

/// Identifier assigned to a record by the store.
pub type RecordId = i64;

/// Identity of an application record. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ApplicationKey {
    pub application_set_name: String,
    pub repository: String,
    pub branch: String,
}

impl ApplicationKey {
    pub fn new(
        application_set_name: impl Into<String>,
        repository: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            application_set_name: application_set_name.into(),
            repository: repository.into(),
            branch: branch.into(),
        }
    }
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, {}, {}",
            self.application_set_name, self.repository, self.branch
        )
    }
}

/// Last successfully validated parameter set for one application.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApplicationRecord {
    pub id: RecordId,
    #[serde(flatten)]
    pub key: ApplicationKey,
    pub state: ParameterSet,
    /// Fingerprint of the commit and check patterns that produced `state`.
    /// `None` for records written before fingerprints existed.
    pub last_known_good_sha: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ApplicationRecord {
    pub fn matches_fingerprint(&self, fingerprint: &str) -> bool {
        self.last_known_good_sha.as_deref() == Some(fingerprint)
    }
}

/// Errors returned by an `ApplicationStore`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("application already exists for {0}")]
    AlreadyExists(ApplicationKey),

    #[error("application not found for {0}")]
    NotFound(ApplicationKey),

    /// More than one record shares a key. This indicates corruption.
    #[error("multiple applications ({count}) found for {key}")]
    MultipleRecordsFound { key: ApplicationKey, count: usize },

    #[error("storage error during {operation}: {message}")]
    Storage {
        operation: &'static str,
        message: String,
    },

    #[error("corrupt {0} in store")]
    Corruption(&'static str),

    #[error("store is closed")]
    Closed,
}

impl StoreError {
    pub fn storage(operation: &'static str, message: impl Into<String>) -> Self {
        StoreError::Storage {
            operation,
            message: message.into(),
        }
    }

    pub fn corruption(what: &'static str) -> Self {
        StoreError::Corruption(what)
    }
}

/// Storage backend for application records.
///
/// Every mutation is durable before the call returns.
#[async_trait]
pub trait ApplicationStore: Send + Sync {
    /// Insert a new record. Fails with `AlreadyExists` if the key is taken.
    async fn create(
        &self,
        key: &ApplicationKey,
        state: &ParameterSet,
        last_known_good_sha: Option<&str>,
    ) -> Result<RecordId, StoreError>;

    /// Look up the record for `key`.
    async fn get(&self, key: &ApplicationKey) -> Result<Option<ApplicationRecord>, StoreError>;

    /// Replace state and fingerprint of an existing record.
    /// Fails with `NotFound` if there is none.
    async fn update(
        &self,
        key: &ApplicationKey,
        state: &ParameterSet,
        last_known_good_sha: Option<&str>,
    ) -> Result<RecordId, StoreError>;

    /// Write and delete a probe row. Returns false on any failure.
    async fn health_check(&self) -> bool;
}

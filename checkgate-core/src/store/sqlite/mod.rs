//! SQLite implementation of `ApplicationStore`.
//!
//! Each record is one row of the `applications` table. The parameter set is
//! kept as a JSON document in `state_json` so the file stays inspectable with
//! the `sqlite3` shell.
//!
//! # Schema Versioning
//!
//! The database has a `schema_version` table that tracks the schema version.
//! When the schema needs to change, increment `CURRENT_SCHEMA_VERSION` and add
//! a migration in `run_migrations()`.


use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{info, warn};
use uuid::Uuid;

use super::{ApplicationKey, ApplicationRecord, ApplicationStore, RecordId, StoreError};
use crate::payload::ParameterSet;

/// Current schema version. Increment this when making schema changes and add
/// corresponding migration logic in `run_migrations()`.
const CURRENT_SCHEMA_VERSION: i64 = 1;

const RECORD_COLUMNS: &str = "id, application_set_name, repository, branch, state_json, \
                              last_known_good_sha, created_at, updated_at";

/// SQLite-backed application store.
///
/// Uses `tokio::task::spawn_blocking` to run synchronous rusqlite operations
/// without blocking the async runtime. The connection is dropped by `close()`;
/// every later operation fails with `StoreError::Closed`.
pub struct SqliteStore {
    pub(crate) conn: Arc<Mutex<Option<Connection>>>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`.
    ///
    /// # Durability
    ///
    /// The database is configured with:
    /// - `journal_mode = WAL`
    /// - `synchronous = FULL` so a returned mutation survives power loss
    /// - `busy_timeout = 5000ms`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let path_str = path_ref.to_string_lossy();
        let is_in_memory = path_str == ":memory:";

        if !is_in_memory {
            if let Some(parent) = path_ref.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        StoreError::storage(
                            "create database directory",
                            format!("{}: {}", parent.display(), e),
                        )
                    })?;
                }
            }
        }

        let conn = Connection::open(path_ref)
            .map_err(|e| StoreError::storage("open database", e.to_string()))?;

        let journal_mode: String = conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
            .map_err(|e| StoreError::storage("set journal_mode", e.to_string()))?;

        let journal_mode_ok = journal_mode.eq_ignore_ascii_case("wal")
            || (is_in_memory && journal_mode.eq_ignore_ascii_case("memory"));
        if !journal_mode_ok {
            return Err(StoreError::storage(
                "configure journal_mode",
                format!(
                    "SQLite returned '{}' instead of 'wal'; the filesystem may not support \
                     shared memory",
                    journal_mode
                ),
            ));
        }

        conn.execute_batch(
            r#"
            PRAGMA synchronous = FULL;
            PRAGMA busy_timeout = 5000;
            "#,
        )
        .map_err(|e| StoreError::storage("configure pragmas", e.to_string()))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL
            );
            "#,
        )
        .map_err(|e| StoreError::storage("create schema_version table", e.to_string()))?;

        let current_version: i64 = conn
            .query_row(
                "SELECT version FROM schema_version WHERE id = 1",
                [],
                |row| row.get(0),
            )
            .optional()
            .map_err(|e| StoreError::storage("get schema version", e.to_string()))?
            .unwrap_or(0);

        Self::run_migrations(&conn, current_version)?;

        if !is_in_memory {
            info!("Opened application store at {}", path_ref.display());
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Create a new in-memory store (for testing).
    pub fn new_in_memory() -> Result<Self, StoreError> {
        Self::open(":memory:")
    }

    /// Run migrations from `from_version` to `CURRENT_SCHEMA_VERSION`.
    fn run_migrations(conn: &Connection, from_version: i64) -> Result<(), StoreError> {
        if from_version > CURRENT_SCHEMA_VERSION {
            return Err(StoreError::storage(
                "schema version",
                format!(
                    "Database schema version {} is newer than supported version {}. \
                     Please upgrade the application.",
                    from_version, CURRENT_SCHEMA_VERSION
                ),
            ));
        }

        if from_version == CURRENT_SCHEMA_VERSION {
            return Ok(());
        }

        if from_version < 1 {
            conn.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS applications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    application_set_name TEXT NOT NULL,
                    repository TEXT NOT NULL,
                    branch TEXT NOT NULL,
                    state_json TEXT NOT NULL,
                    last_known_good_sha TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_applications_key
                    ON applications(application_set_name, repository, branch);

                CREATE TABLE IF NOT EXISTS health_probe (
                    probe_id TEXT PRIMARY KEY,
                    written_at TEXT NOT NULL
                );
                "#,
            )
            .map_err(|e| StoreError::storage("migration v1", e.to_string()))?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (id, version) VALUES (1, ?1)",
            params![CURRENT_SCHEMA_VERSION],
        )
        .map_err(|e| StoreError::storage("update schema version", e.to_string()))?;

        Ok(())
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::storage(operation, "connection mutex poisoned"))?;
            let conn = guard.as_mut().ok_or(StoreError::Closed)?;
            f(conn)
        })
        .await
        .map_err(|e| StoreError::storage(operation, e.to_string()))?
    }

    /// All records, oldest first.
    pub async fn list(&self) -> Result<Vec<ApplicationRecord>, StoreError> {
        self.with_conn("list", |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM applications ORDER BY id",
                    RECORD_COLUMNS
                ))
                .map_err(|e| StoreError::storage("list", e.to_string()))?;
            let rows = stmt
                .query_map([], read_row)
                .map_err(|e| StoreError::storage("list", e.to_string()))?
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::storage("list", e.to_string()))?;
            rows.into_iter().map(RawRecord::into_record).collect()
        })
        .await
    }

    /// Close the underlying connection.
    ///
    /// Safe to call more than once.
    pub async fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.clone();

        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StoreError::storage("close", "connection mutex poisoned"))?;
            match guard.take() {
                Some(conn) => conn
                    .close()
                    .map_err(|(_, e)| StoreError::storage("close", e.to_string())),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| StoreError::storage("close", e.to_string()))?
    }
}

/// A row as read from SQLite, before the state JSON is parsed.
struct RawRecord {
    id: RecordId,
    key: ApplicationKey,
    state_json: String,
    last_known_good_sha: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RawRecord {
    fn into_record(self) -> Result<ApplicationRecord, StoreError> {
        let state: ParameterSet = serde_json::from_str(&self.state_json)
            .map_err(|_| StoreError::corruption("state JSON"))?;
        Ok(ApplicationRecord {
            id: self.id,
            key: self.key,
            state,
            last_known_good_sha: self.last_known_good_sha,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

fn read_row(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok(RawRecord {
        id: row.get(0)?,
        key: ApplicationKey {
            application_set_name: row.get(1)?,
            repository: row.get(2)?,
            branch: row.get(3)?,
        },
        state_json: row.get(4)?,
        last_known_good_sha: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
    })
}

/// All rows stored under `key`. More than one means the table is corrupt.
fn find_by_key(
    conn: &Connection,
    key: &ApplicationKey,
    operation: &'static str,
) -> Result<Vec<RawRecord>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM applications
             WHERE application_set_name = ?1 AND repository = ?2 AND branch = ?3",
            RECORD_COLUMNS
        ))
        .map_err(|e| StoreError::storage(operation, e.to_string()))?;
    let rows = stmt
        .query_map(
            params![key.application_set_name, key.repository, key.branch],
            read_row,
        )
        .map_err(|e| StoreError::storage(operation, e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StoreError::storage(operation, e.to_string()))?;
    Ok(rows)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl ApplicationStore for SqliteStore {
    async fn create(
        &self,
        key: &ApplicationKey,
        state: &ParameterSet,
        last_known_good_sha: Option<&str>,
    ) -> Result<RecordId, StoreError> {
        let key = key.clone();
        let state_json = serde_json::to_string(state)
            .map_err(|e| StoreError::storage("serialize state", e.to_string()))?;
        let fingerprint = last_known_good_sha.map(str::to_string);

        self.with_conn("create", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("create", e.to_string()))?;

            if !find_by_key(&tx, &key, "create")?.is_empty() {
                return Err(StoreError::AlreadyExists(key));
            }

            let timestamp = now();
            let inserted = tx.execute(
                "INSERT INTO applications (application_set_name, repository, branch,
                                           state_json, last_known_good_sha, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                params![
                    key.application_set_name,
                    key.repository,
                    key.branch,
                    state_json,
                    fingerprint,
                    timestamp
                ],
            );
            match inserted {
                Ok(_) => {}
                Err(e) if is_constraint_violation(&e) => {
                    return Err(StoreError::AlreadyExists(key));
                }
                Err(e) => return Err(StoreError::storage("create", e.to_string())),
            }

            let id = tx.last_insert_rowid();
            tx.commit()
                .map_err(|e| StoreError::storage("create", e.to_string()))?;
            Ok(id)
        })
        .await
    }

    async fn get(&self, key: &ApplicationKey) -> Result<Option<ApplicationRecord>, StoreError> {
        let key = key.clone();

        self.with_conn("get", move |conn| {
            let mut rows = find_by_key(conn, &key, "get")?;
            match rows.len() {
                0 => Ok(None),
                1 => rows.pop().map(RawRecord::into_record).transpose(),
                count => Err(StoreError::MultipleRecordsFound { key, count }),
            }
        })
        .await
    }

    async fn update(
        &self,
        key: &ApplicationKey,
        state: &ParameterSet,
        last_known_good_sha: Option<&str>,
    ) -> Result<RecordId, StoreError> {
        let key = key.clone();
        let state_json = serde_json::to_string(state)
            .map_err(|e| StoreError::storage("serialize state", e.to_string()))?;
        let fingerprint = last_known_good_sha.map(str::to_string);

        self.with_conn("update", move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| StoreError::storage("update", e.to_string()))?;

            let rows = find_by_key(&tx, &key, "update")?;
            let id = match rows.as_slice() {
                [] => return Err(StoreError::NotFound(key)),
                [row] => row.id,
                _ => {
                    return Err(StoreError::MultipleRecordsFound {
                        key,
                        count: rows.len(),
                    })
                }
            };

            tx.execute(
                "UPDATE applications
                 SET state_json = ?1, last_known_good_sha = ?2, updated_at = ?3
                 WHERE id = ?4",
                params![state_json, fingerprint, now(), id],
            )
            .map_err(|e| StoreError::storage("update", e.to_string()))?;

            tx.commit()
                .map_err(|e| StoreError::storage("update", e.to_string()))?;
            Ok(id)
        })
        .await
    }

    async fn health_check(&self) -> bool {
        let probe_id = Uuid::new_v4().to_string();

        let result = self
            .with_conn("health check", move |conn| {
                conn.execute(
                    "INSERT INTO health_probe (probe_id, written_at) VALUES (?1, ?2)",
                    params![probe_id, now()],
                )
                .map_err(|e| StoreError::storage("health check write", e.to_string()))?;

                let deleted = conn
                    .execute(
                        "DELETE FROM health_probe WHERE probe_id = ?1",
                        params![probe_id],
                    )
                    .map_err(|e| StoreError::storage("health check delete", e.to_string()))?;

                if deleted != 1 {
                    return Err(StoreError::storage(
                        "health check delete",
                        format!("expected to delete 1 probe row, deleted {}", deleted),
                    ));
                }
                Ok(())
            })
            .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("Store health check failed: {}", e);
                false
            }
        }
    }
}

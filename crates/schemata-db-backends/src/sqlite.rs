//! SQLite database backend using `rusqlite`.
//!
//! This module provides the [`SqliteBackend`] which implements
//! [`DbExecutor`] and [`DatabaseBackend`](crate::base::DatabaseBackend) using
//! `rusqlite` wrapped in `tokio::task::spawn_blocking` for async compatibility.
//!
//! Features:
//! - WAL mode enabled by default for file-based databases
//! - In-memory database support via `:memory:` path (great for testing)
//! - Simple `Mutex`-based concurrency control; one physical connection
//! - The stored schema version lives in `PRAGMA user_version`

use crate::base::{DatabaseBackend, DatabaseConfig};
use rusqlite::{ErrorCode, OpenFlags};
use schemata_core::{StoreError, StoreResult};
use schemata_db::{quote_ident, DbExecutor, Row, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// A SQLite database backend.
///
/// Uses `rusqlite` for database access with a `Mutex`-based concurrency
/// model. All operations are run via `tokio::task::spawn_blocking` to
/// avoid blocking the async runtime.
pub struct SqliteBackend {
    /// The path to the database file (or ":memory:").
    path: PathBuf,
    /// Whether the database lives only in memory.
    memory: bool,
    /// The connection, guarded by an async mutex.
    conn: Arc<Mutex<rusqlite::Connection>>,
}

impl std::fmt::Debug for SqliteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteBackend")
            .field("path", &self.path)
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

impl SqliteBackend {
    /// Opens a SQLite database at the given path with default settings.
    ///
    /// If the path is `:memory:`, an in-memory database is created.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        Self::open_with(&DatabaseConfig::sqlite_file(path))
    }

    /// Opens an in-memory database (convenience constructor).
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be created.
    pub fn memory() -> StoreResult<Self> {
        Self::open_with(&DatabaseConfig::sqlite_memory())
    }

    /// Opens a database described by `config`.
    ///
    /// The journal mode is applied only to file-backed databases; memory
    /// databases always use SQLite's in-memory journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or the pragmas
    /// cannot be applied.
    pub fn open_with(config: &DatabaseConfig) -> StoreResult<Self> {
        if !config.journal_mode.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(StoreError::ConfigurationError(format!(
                "Invalid journal mode '{}'",
                config.journal_mode
            )));
        }

        let memory = config.is_memory();
        let conn = if memory {
            rusqlite::Connection::open_in_memory()
        } else {
            rusqlite::Connection::open(&config.path)
        }
        .map_err(|e| StoreError::OperationalError(format!("SQLite open failed: {e}")))?;

        let mut pragmas = format!(
            "PRAGMA foreign_keys={};",
            if config.foreign_keys { "ON" } else { "OFF" }
        );
        if !memory {
            pragmas.push_str(&format!(" PRAGMA journal_mode={};", config.journal_mode));
        }
        conn.execute_batch(&pragmas).map_err(|e| {
            StoreError::OperationalError(format!("Failed to set pragmas: {e}"))
        })?;
        conn.busy_timeout(config.busy_timeout).map_err(|e| {
            StoreError::OperationalError(format!("Failed to set busy timeout: {e}"))
        })?;

        tracing::debug!("Opened SQLite database at {}", config.path.display());

        Ok(Self {
            path: config.path.clone(),
            memory,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Returns the database file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Runs `f` against the raw connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&rusqlite::Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.blocking_lock();
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::DatabaseError(format!("Task join error: {e}")))?
    }

    /// Binds `Value` parameters to a `rusqlite` statement.
    fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &[Value]) -> StoreResult<()> {
        for (i, param) in params.iter().enumerate() {
            let idx = i + 1;
            match param {
                Value::Null => stmt.raw_bind_parameter(idx, rusqlite::types::Null),
                Value::Bool(b) => stmt.raw_bind_parameter(idx, b),
                Value::Int(v) => stmt.raw_bind_parameter(idx, v),
                Value::Float(v) => stmt.raw_bind_parameter(idx, v),
                Value::String(s) => stmt.raw_bind_parameter(idx, s.as_str()),
                Value::Bytes(b) => stmt.raw_bind_parameter(idx, b.as_slice()),
                Value::DateTime(dt) => stmt.raw_bind_parameter(idx, dt.to_string().as_str()),
                Value::DateTimeTz(dt) => stmt.raw_bind_parameter(idx, dt.to_rfc3339().as_str()),
                Value::Uuid(u) => stmt.raw_bind_parameter(idx, u.to_string().as_str()),
                Value::Json(j) => stmt.raw_bind_parameter(idx, j.to_string().as_str()),
            }
            .map_err(|e| StoreError::DatabaseError(format!("Bind error: {e}")))?;
        }
        Ok(())
    }

    /// Converts a `rusqlite::Row` to our generic `Row`.
    fn convert_row(sqlite_row: &rusqlite::Row<'_>, column_names: &[String]) -> Row {
        let values: Vec<Value> = (0..column_names.len())
            .map(|i| {
                let val_ref = sqlite_row
                    .get_ref(i)
                    .unwrap_or(rusqlite::types::ValueRef::Null);
                match val_ref {
                    rusqlite::types::ValueRef::Null => Value::Null,
                    rusqlite::types::ValueRef::Integer(v) => Value::Int(v),
                    rusqlite::types::ValueRef::Real(v) => Value::Float(v),
                    rusqlite::types::ValueRef::Text(b) => {
                        Value::String(String::from_utf8_lossy(b).to_string())
                    }
                    rusqlite::types::ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
                }
            })
            .collect();

        Row::new(column_names.to_vec(), values)
    }

    fn run_query(
        conn: &rusqlite::Connection,
        sql: &str,
        params: &[Value],
    ) -> StoreResult<Vec<Row>> {
        let mut stmt = conn.prepare(sql).map_err(map_sqlite_error)?;
        let column_names: Vec<String> = stmt
            .column_names()
            .into_iter()
            .map(String::from)
            .collect();

        Self::bind_params(&mut stmt, params)?;

        let mut raw_rows = stmt.raw_query();
        let mut rows = Vec::new();
        while let Some(row) = raw_rows.next().map_err(map_sqlite_error)? {
            rows.push(Self::convert_row(row, &column_names));
        }
        Ok(rows)
    }
}

/// Maps a `rusqlite` error into the store taxonomy.
fn map_sqlite_error(e: rusqlite::Error) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation => {
            StoreError::IntegrityError(e.to_string())
        }
        rusqlite::Error::SqliteFailure(err, _)
            if matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen
            ) =>
        {
            StoreError::OperationalError(e.to_string())
        }
        _ => StoreError::DatabaseError(e.to_string()),
    }
}

#[async_trait::async_trait]
impl DbExecutor for SqliteBackend {
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> StoreResult<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            Self::bind_params(&mut stmt, &params)?;
            let count = stmt.raw_execute().map_err(map_sqlite_error)?;
            Ok(count as u64)
        })
        .await
    }

    async fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| conn.execute_batch(&sql).map_err(map_sqlite_error))
            .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| Self::run_query(conn, &sql, &params))
            .await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StoreResult<i64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&sql).map_err(map_sqlite_error)?;
            Self::bind_params(&mut stmt, &params)?;
            stmt.raw_execute().map_err(map_sqlite_error)?;
            Ok(conn.last_insert_rowid())
        })
        .await
    }

    async fn in_transaction(&self) -> StoreResult<bool> {
        self.with_conn(|conn| Ok(!conn.is_autocommit())).await
    }
}

#[async_trait::async_trait]
impl DatabaseBackend for SqliteBackend {
    fn vendor(&self) -> &str {
        "sqlite"
    }

    fn is_memory(&self) -> bool {
        self.memory
    }

    async fn user_version(&self) -> StoreResult<u32> {
        self.with_conn(|conn| pragma_user_version(conn)).await
    }

    async fn set_user_version(&self, version: u32) -> StoreResult<()> {
        self.with_conn(move |conn| {
            conn.pragma_update(None, "user_version", i64::from(version))
                .map_err(map_sqlite_error)
        })
        .await
    }

    async fn table_exists(&self, name: &str) -> StoreResult<bool> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ? COLLATE NOCASE",
                &[Value::from(name)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn index_exists(&self, name: &str) -> StoreResult<bool> {
        let rows = self
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'index' AND name = ? COLLATE NOCASE",
                &[Value::from(name)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    async fn column_names(&self, table: &str) -> StoreResult<Vec<String>> {
        let sql = format!("PRAGMA table_info({})", quote_ident(table));
        let rows = self.query(&sql, &[]).await?;
        rows.iter().map(|row| row.get::<String>("name")).collect()
    }
}

fn pragma_user_version(conn: &rusqlite::Connection) -> StoreResult<u32> {
    let raw: i64 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(map_sqlite_error)?;
    u32::try_from(raw).map_err(|_| {
        StoreError::DatabaseError(format!("Stored schema version {raw} is out of range"))
    })
}

/// Reads the stored schema version of the database file at `path` through a
/// separate read-only connection.
///
/// Returns 0 if the file does not exist. The file is never created or
/// modified.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read as a database.
pub async fn read_user_version(path: impl Into<PathBuf>) -> StoreResult<u32> {
    let path = path.into();
    tokio::task::spawn_blocking(move || {
        if !path.exists() {
            return Ok(0);
        }
        let conn = rusqlite::Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::OperationalError(format!("SQLite open failed: {e}")))?;
        pragma_user_version(&conn)
    })
    .await
    .map_err(|e| StoreError::DatabaseError(format!("Task join error: {e}")))?
}

/// Deletes the database file at `path` together with its `-wal`, `-shm` and
/// `-journal` companions. Missing files are ignored.
///
/// # Errors
///
/// Returns an error if an existing file cannot be removed.
pub fn remove_database_files(path: &Path) -> StoreResult<()> {
    let mut targets = vec![path.to_path_buf()];
    for suffix in ["-wal", "-shm", "-journal"] {
        let mut name = path.as_os_str().to_owned();
        name.push(suffix);
        targets.push(PathBuf::from(name));
    }
    for target in targets {
        match std::fs::remove_file(&target) {
            Ok(()) => tracing::debug!("Removed {}", target.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

//! Base database backend trait and connection configuration.
//!
//! This module defines the [`DatabaseBackend`] trait that backend
//! implementations satisfy on top of [`DbExecutor`], along with the
//! [`DatabaseConfig`] used to open connections.

use std::path::PathBuf;
use std::time::Duration;

use schemata_core::settings::{Settings, MEMORY_DATABASE};
use schemata_core::StoreResult;
use schemata_db::DbExecutor;

/// Backend capabilities the schema engine needs beyond plain statement
/// execution: the stored schema version and catalog introspection.
///
/// All methods are async because database operations are I/O-bound. Even
/// backends that use synchronous drivers (like `rusqlite`) wrap operations
/// in `spawn_blocking` to keep the async interface.
#[async_trait::async_trait]
pub trait DatabaseBackend: DbExecutor {
    /// Returns the vendor name (e.g., "sqlite").
    fn vendor(&self) -> &str;

    /// Returns `true` if the database lives only in memory.
    fn is_memory(&self) -> bool;

    /// Returns the schema version recorded in the database header.
    /// A never-initialized database reports 0.
    async fn user_version(&self) -> StoreResult<u32>;

    /// Records `version` as the stored schema version. Inside a transaction
    /// the change commits or rolls back with it.
    async fn set_user_version(&self, version: u32) -> StoreResult<()>;

    /// Returns `true` if a table named `name` exists.
    async fn table_exists(&self, name: &str) -> StoreResult<bool>;

    /// Returns `true` if an index named `name` exists.
    async fn index_exists(&self, name: &str) -> StoreResult<bool>;

    /// Returns the column names of `table` in declaration order.
    async fn column_names(&self, table: &str) -> StoreResult<Vec<String>>;
}

/// Configuration for opening a database connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// The database file path (or `:memory:`).
    pub path: PathBuf,
    /// Journal mode applied to file-backed databases.
    pub journal_mode: String,
    /// Whether foreign key constraints are enforced.
    pub foreign_keys: bool,
    /// How long to wait on a locked database.
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    /// Creates a configuration for an in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self::sqlite_file(MEMORY_DATABASE)
    }

    /// Creates a configuration for a SQLite file database.
    pub fn sqlite_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            journal_mode: "WAL".to_string(),
            foreign_keys: true,
            busy_timeout: Duration::from_millis(5_000),
        }
    }

    /// Builds a configuration from loaded [`Settings`].
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            path: PathBuf::from(&settings.database),
            journal_mode: settings.journal_mode.clone(),
            foreign_keys: settings.foreign_keys,
            busy_timeout: Duration::from_millis(settings.busy_timeout_ms),
        }
    }

    /// Returns `true` if this configuration targets a memory database.
    pub fn is_memory(&self) -> bool {
        self.path.to_str() == Some(MEMORY_DATABASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_sqlite_memory() {
        let cfg = DatabaseConfig::sqlite_memory();
        assert_eq!(cfg.path, PathBuf::from(":memory:"));
        assert!(cfg.is_memory());
        assert!(cfg.foreign_keys);
    }

    #[test]
    fn test_database_config_sqlite_file() {
        let cfg = DatabaseConfig::sqlite_file("/tmp/test.db");
        assert_eq!(cfg.path, PathBuf::from("/tmp/test.db"));
        assert!(!cfg.is_memory());
        assert_eq!(cfg.journal_mode, "WAL");
    }

    #[test]
    fn test_database_config_from_settings() {
        let settings = Settings {
            database: "/data/app.db".into(),
            journal_mode: "DELETE".into(),
            foreign_keys: false,
            busy_timeout_ms: 100,
            ..Settings::default()
        };
        let cfg = DatabaseConfig::from_settings(&settings);
        assert_eq!(cfg.path, PathBuf::from("/data/app.db"));
        assert_eq!(cfg.journal_mode, "DELETE");
        assert!(!cfg.foreign_keys);
        assert_eq!(cfg.busy_timeout, Duration::from_millis(100));
    }
}

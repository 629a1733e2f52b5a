//! # schemata-db-backends
//!
//! Database backend implementations for schemata. Provides connection setup,
//! query execution, stored-version access, and schema introspection.
//!
//! Supported backends:
//! - `SQLite` (feature `sqlite`, enabled by default)

#![allow(clippy::result_large_err)]
#![allow(clippy::significant_drop_tightening)]

pub mod base;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use base::{DatabaseBackend, DatabaseConfig};
#[cfg(feature = "sqlite")]
pub use sqlite::{read_user_version, remove_database_files, SqliteBackend};

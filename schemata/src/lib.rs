//! # schemata
//!
//! Versioned schema lifecycle management for embedded SQLite stores.
//!
//! This is the meta-crate that re-exports all sub-crates for convenient access.
//! You can depend on `schemata` to get everything, or depend on individual
//! crates for finer-grained control.
//!
//! ```
//! use schemata::migrations::{MigrationStepBuilder, TableDescriptor, VersionedSchemaStore};
//!
//! # async fn run() -> schemata::core::StoreResult<()> {
//! let steps = MigrationStepBuilder::new("notes")
//!     .at_version(2)
//!     .add_column("body", "TEXT")
//!     .build()?;
//! let notes = TableDescriptor::new(
//!     "notes",
//!     "CREATE TABLE notes (id INTEGER PRIMARY KEY, title TEXT NOT NULL)",
//! )
//! .with_steps(steps);
//!
//! let store = VersionedSchemaStore::with_max_version("app.sqlite3", vec![notes])?;
//! let db = store.open().await?;
//! # drop(db);
//! # Ok(())
//! # }
//! ```

/// Error taxonomy, settings, and logging setup.
pub use schemata_core as core;

/// Values, rows, the executor trait, and transactions.
pub use schemata_db as db;

/// Database backends: `SQLite`.
pub use schemata_db_backends as db_backends;

/// Migration engine and store lifecycle.
#[cfg(feature = "migrations")]
pub use schemata_migrations as migrations;

// Third-party re-exports.
pub use async_trait::async_trait;
pub use tokio;
pub use tracing;

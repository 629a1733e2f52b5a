//! # schemata-migrations
//!
//! Versioned migration engine for schemata. Keeps an embedded SQLite
//! database at a declared schema version and replays each schema change
//! exactly once per installation.
//!
//! ## Architecture
//!
//! - [`MigrationStep`] is one versioned change for one table, carrying an
//!   [`Operation`] (raw SQL, structured column/index changes, or a
//!   [`MigrationHandler`]).
//! - [`MigrationStepBuilder`] produces the steps of one table with validated
//!   identifiers and declaration-order priorities.
//! - [`TableDescriptor`] holds a table's creation DDL, its steps, and its
//!   soft-delete configuration.
//! - [`MigrationLedger`] records applied steps by content hash inside the
//!   database itself.
//! - [`MigrationScheduler`] orders pending steps across tables and runs them.
//! - [`VersionedSchemaStore`] owns the connection and drives the
//!   create/upgrade/recreate lifecycle.
//!
//! ## Module Overview
//!
//! - [`step`] - `MigrationStep`, `Operation`, `MigrationHandler`
//! - [`builder`] - `MigrationStepBuilder`
//! - [`table`] - `TableDescriptor`, identifier validation, soft delete
//! - [`ledger`] - `MigrationLedger`, `LedgerEntry`
//! - [`scheduler`] - `MigrationScheduler`, `MigrationPlan`, `PlannedStep`
//! - [`store`] - `VersionedSchemaStore`, `MigrationReport`, `Transition`

#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::future_not_send)]

pub mod builder;
pub mod ledger;
pub mod scheduler;
pub mod step;
pub mod store;
pub mod table;

// Re-export key types at the crate root.
pub use builder::MigrationStepBuilder;
pub use ledger::{LedgerEntry, MigrationLedger, LEDGER_TABLE};
pub use scheduler::{MigrationPlan, MigrationScheduler, PassOutcome, PlannedStep};
pub use step::{MigrationHandler, MigrationStep, Operation};
pub use store::{ConnectionHandle, MigrationReport, Transition, VersionedSchemaStore};
pub use table::{validate_identifier, TableDescriptor, DEFAULT_SOFT_DELETE_COLUMN};

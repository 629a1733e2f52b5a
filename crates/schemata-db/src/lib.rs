//! # schemata-db
//!
//! The connection contract shared by the schema engine and the CRUD layer
//! that sits on top of it. Backends implement [`DbExecutor`]; everything else
//! in schemata talks to a database only through that trait.
//!
//! ## Module Overview
//!
//! - [`value`] - The backend-agnostic [`Value`](value::Value) enum
//! - [`row`] - Result rows and typed column access via [`FromValue`](row::FromValue)
//! - [`executor`] - The [`DbExecutor`] trait with insert/update/delete helpers
//! - [`transactions`] - [`atomic`](transactions::atomic) blocks and savepoints

// - result_large_err: StoreError is the crate-wide error type and is used consistently
// - doc_markdown: backtick requirements for documentation items are too strict
// - significant_drop_tightening: false positives with async Mutex guards
#![allow(clippy::result_large_err)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_const_for_fn)]

pub mod executor;
pub mod row;
pub mod transactions;
pub mod value;

// Re-export the most commonly used types at the crate root.
pub use executor::{quote_ident, DbExecutor};
pub use row::{FromValue, Row};
pub use transactions::{atomic, Savepoint, TransactionManager};
pub use value::Value;

//! # schemata-core
//!
//! Core types shared by every schemata crate: the error taxonomy, store
//! settings and the settings loader, and tracing-based logging setup.
//! This crate has no schemata dependencies and provides the foundation for all
//! other crates.
//!
//! ## Modules
//!
//! - [`error`] - Error types and result aliases
//! - [`settings`] - Store settings with defaults
//! - [`settings_loader`] - Loading settings from TOML, JSON and the environment
//! - [`logging`] - Tracing-based logging integration

pub mod error;
pub mod logging;
pub mod settings;
pub mod settings_loader;

// Re-export the most commonly used types at the crate root.
pub use error::{StoreError, StoreResult};
pub use settings::Settings;

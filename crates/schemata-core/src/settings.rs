//! Settings for schemata stores.
//!
//! [`Settings`] holds the runtime knobs that are naturally deployment
//! specific: where the database lives, how the connection is tuned, and how
//! logging is emitted. The schema itself (target version and tables) is code
//! and never comes from settings.

use serde::{Deserialize, Serialize};

/// The marker used for memory-backed databases.
pub const MEMORY_DATABASE: &str = ":memory:";

/// The complete set of store settings.
///
/// # Examples
///
/// ```
/// use schemata_core::settings::Settings;
///
/// let settings = Settings::default();
/// assert!(settings.debug);
/// assert_eq!(settings.journal_mode, "WAL");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    // ── Database ─────────────────────────────────────────────────────

    /// The database file path, or `:memory:` for a memory-backed store.
    pub database: String,
    /// The SQLite journal mode applied to file-backed databases.
    pub journal_mode: String,
    /// Whether foreign key enforcement is enabled.
    pub foreign_keys: bool,
    /// How long a connection waits on a locked database, in milliseconds.
    pub busy_timeout_ms: u64,

    // ── Logging ──────────────────────────────────────────────────────

    /// Whether debug mode is enabled (pretty logs instead of JSON).
    pub debug: bool,
    /// The log level filter (e.g. "info", "debug", "schemata=trace").
    pub log_level: String,
}

impl Settings {
    /// Returns `true` if the configured database is memory-backed.
    pub fn is_memory(&self) -> bool {
        self.database == MEMORY_DATABASE
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database: "schemata.sqlite3".to_string(),
            journal_mode: "WAL".to_string(),
            foreign_keys: true,
            busy_timeout_ms: 5_000,
            debug: true,
            log_level: "info".to_string(),
        }
    }
}

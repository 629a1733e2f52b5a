//! The migration ledger.
//!
//! The [`MigrationLedger`] records which steps have been applied, keyed by
//! `(table_name, migration_version, migration_hash)`, in a table that lives
//! in the same database as the data it describes. Writes happen on the
//! connection of the running pass, so a step and its ledger row commit or
//! roll back together.

use chrono::{DateTime, Utc};
use schemata_core::StoreResult;
use schemata_db::{DbExecutor, Row, Value};
use serde::{Deserialize, Serialize};

use crate::step::MigrationStep;

/// The name of the ledger table.
pub const LEDGER_TABLE: &str = "schemata_migrations";

/// One applied step as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub table_name: String,
    pub migration_version: u32,
    pub migration_hash: String,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn from_row(row: &Row) -> StoreResult<Self> {
        Ok(Self {
            table_name: row.get("table_name")?,
            migration_version: row.get("migration_version")?,
            migration_hash: row.get("migration_hash")?,
            description: row.get("description")?,
            applied_at: row.get("applied_at")?,
        })
    }
}

/// Reads and writes the ledger table.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrationLedger;

impl MigrationLedger {
    pub const fn new() -> Self {
        Self
    }

    /// Returns the DDL that creates the ledger table and its lookup index.
    pub fn schema_sql() -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS \"{LEDGER_TABLE}\" (\
                \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
                \"table_name\" TEXT NOT NULL, \
                \"migration_version\" INTEGER NOT NULL, \
                \"migration_hash\" TEXT NOT NULL, \
                \"description\" TEXT NOT NULL, \
                \"applied_at\" TEXT NOT NULL, \
                UNIQUE (\"table_name\", \"migration_version\", \"migration_hash\")\
            ); \
            CREATE INDEX IF NOT EXISTS \"idx_{LEDGER_TABLE}_table_version\" \
                ON \"{LEDGER_TABLE}\" (\"table_name\", \"migration_version\");"
        )
    }

    /// Creates the ledger table if it does not exist.
    pub async fn ensure_table(&self, db: &dyn DbExecutor) -> StoreResult<()> {
        db.execute_batch(&Self::schema_sql()).await
    }

    /// Returns `true` if a step of `table` with `hash` has been recorded.
    pub async fn is_applied(
        &self,
        db: &dyn DbExecutor,
        table: &str,
        hash: &str,
    ) -> StoreResult<bool> {
        let rows = db
            .query(
                &format!(
                    "SELECT 1 AS present FROM \"{LEDGER_TABLE}\" \
                     WHERE \"table_name\" = ? AND \"migration_hash\" = ? LIMIT 1"
                ),
                &[Value::from(table), Value::from(hash)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Returns `true` if any step of `table` at `version` has been recorded.
    pub async fn has_version(
        &self,
        db: &dyn DbExecutor,
        table: &str,
        version: u32,
    ) -> StoreResult<bool> {
        let rows = db
            .query(
                &format!(
                    "SELECT 1 AS present FROM \"{LEDGER_TABLE}\" \
                     WHERE \"table_name\" = ? AND \"migration_version\" = ? LIMIT 1"
                ),
                &[Value::from(table), Value::from(version)],
            )
            .await?;
        Ok(!rows.is_empty())
    }

    /// Records `step` as applied now.
    pub async fn record_applied(&self, db: &dyn DbExecutor, step: &MigrationStep) -> StoreResult<()> {
        db.insert(
            LEDGER_TABLE,
            &[
                ("table_name", Value::from(step.table())),
                ("migration_version", Value::from(step.version())),
                ("migration_hash", Value::from(step.content_hash())),
                ("description", Value::from(step.description())),
                ("applied_at", Value::from(Utc::now())),
            ],
        )
        .await?;
        Ok(())
    }

    /// Returns every ledger row, most recently applied first.
    pub async fn applied_migrations(&self, db: &dyn DbExecutor) -> StoreResult<Vec<LedgerEntry>> {
        let rows = db
            .query(
                &format!(
                    "SELECT \"table_name\", \"migration_version\", \"migration_hash\", \
                     \"description\", \"applied_at\" FROM \"{LEDGER_TABLE}\" \
                     ORDER BY \"applied_at\" DESC, \"id\" DESC"
                ),
                &[],
            )
            .await?;
        rows.iter().map(LedgerEntry::from_row).collect()
    }
}

//! Migration steps and the operations they carry.
//!
//! A [`MigrationStep`] is one versioned schema change for one table. Its
//! [`Operation`] is either a structured change (column add/rename, index
//! create/drop) that lowers to SQL, raw SQL, or a [`MigrationHandler`] run
//! against the live transactional connection.

use std::fmt;
use std::sync::Arc;

use schemata_core::StoreResult;
use schemata_db::{quote_ident, DbExecutor};
use sha2::{Digest, Sha256};

use crate::table::TableDescriptor;

/// An executable migration body for changes no structured operation covers
/// (table recreation, data backfills, constraint changes).
///
/// The handler receives the connection of the running pass, so everything it
/// does commits or rolls back with the rest of the pass. Nested
/// [`atomic`](schemata_db::atomic) calls become savepoints.
#[async_trait::async_trait]
pub trait MigrationHandler: Send + Sync {
    /// Applies the change to `table`.
    async fn apply(&self, db: &dyn DbExecutor, table: &TableDescriptor) -> StoreResult<()>;
}

/// What a migration step does.
#[derive(Clone)]
pub enum Operation {
    /// One or more `;`-separated SQL statements.
    RawSql(String),
    /// `ALTER TABLE ... ADD COLUMN`.
    AddColumn {
        /// The new column name.
        column: String,
        /// Type and constraints, e.g. `TEXT NOT NULL DEFAULT ''`.
        definition: String,
    },
    /// `ALTER TABLE ... RENAME COLUMN`.
    RenameColumn {
        /// The current column name.
        from: String,
        /// The new column name.
        to: String,
    },
    /// `CREATE [UNIQUE] INDEX`.
    CreateIndex {
        /// The index name.
        name: String,
        /// The indexed columns, in order.
        columns: Vec<String>,
        /// Whether the index enforces uniqueness.
        unique: bool,
    },
    /// `DROP INDEX`.
    DropIndex {
        /// The index name.
        name: String,
    },
    /// An arbitrary handler.
    Custom(Arc<dyn MigrationHandler>),
}

impl Operation {
    /// Returns a short name for the operation kind.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RawSql(_) => "raw_sql",
            Self::AddColumn { .. } => "add_column",
            Self::RenameColumn { .. } => "rename_column",
            Self::CreateIndex { .. } => "create_index",
            Self::DropIndex { .. } => "drop_index",
            Self::Custom(_) => "custom",
        }
    }

    /// Lowers the operation to SQL against `table`.
    ///
    /// Returns `None` for [`Operation::Custom`], which has no SQL form.
    pub fn to_sql(&self, table: &str) -> Option<String> {
        let sql = match self {
            Self::RawSql(sql) => sql.clone(),
            Self::AddColumn { column, definition } => format!(
                "ALTER TABLE {} ADD COLUMN {} {definition}",
                quote_ident(table),
                quote_ident(column)
            ),
            Self::RenameColumn { from, to } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quote_ident(table),
                quote_ident(from),
                quote_ident(to)
            ),
            Self::CreateIndex {
                name,
                columns,
                unique,
            } => {
                let cols: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();
                format!(
                    "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
                    if *unique { "UNIQUE " } else { "" },
                    quote_ident(name),
                    quote_ident(table),
                    cols.join(", ")
                )
            }
            Self::DropIndex { name } => format!("DROP INDEX IF EXISTS {}", quote_ident(name)),
            Self::Custom(_) => return None,
        };
        Some(sql)
    }
}

impl fmt::Debug for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RawSql(sql) => f.debug_tuple("RawSql").field(sql).finish(),
            Self::AddColumn { column, definition } => f
                .debug_struct("AddColumn")
                .field("column", column)
                .field("definition", definition)
                .finish(),
            Self::RenameColumn { from, to } => f
                .debug_struct("RenameColumn")
                .field("from", from)
                .field("to", to)
                .finish(),
            Self::CreateIndex {
                name,
                columns,
                unique,
            } => f
                .debug_struct("CreateIndex")
                .field("name", name)
                .field("columns", columns)
                .field("unique", unique)
                .finish(),
            Self::DropIndex { name } => f.debug_struct("DropIndex").field("name", name).finish(),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// One versioned, ordered schema change for one table.
///
/// Steps are immutable once built. Use
/// [`MigrationStepBuilder`](crate::builder::MigrationStepBuilder) to produce
/// them with validated identifiers and auto-incrementing priorities.
#[derive(Debug, Clone)]
pub struct MigrationStep {
    table: String,
    version: u32,
    priority: i32,
    description: String,
    operation: Operation,
    fingerprint: Option<String>,
}

impl MigrationStep {
    /// Creates a step with priority 0.
    pub fn new(
        table: impl Into<String>,
        version: u32,
        description: impl Into<String>,
        operation: Operation,
    ) -> Self {
        Self {
            table: table.into(),
            version,
            priority: 0,
            description: description.into(),
            operation,
            fingerprint: None,
        }
    }

    /// Sets the intra-version priority.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches a content fingerprint that becomes part of the content hash.
    ///
    /// A step whose fingerprint changed no longer matches its ledger row, so
    /// any later pass whose version interval covers it runs it again.
    pub fn with_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.fingerprint = Some(fingerprint.into());
        self
    }

    /// The name of the table this step belongs to.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The schema version that introduces this step.
    pub const fn version(&self) -> u32 {
        self.version
    }

    /// The ordering key within a version.
    pub const fn priority(&self) -> i32 {
        self.priority
    }

    /// The human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// The operation this step performs.
    pub const fn operation(&self) -> &Operation {
        &self.operation
    }

    /// The caller-supplied fingerprint, if any.
    pub fn fingerprint(&self) -> Option<&str> {
        self.fingerprint.as_deref()
    }

    /// Returns the SHA-256 hex digest identifying this step in the ledger.
    ///
    /// The digest covers table, version, priority and description (plus the
    /// fingerprint when one is attached), never the operation body. Two steps
    /// that agree on all of those are the same step as far as the ledger is
    /// concerned.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.table.as_bytes());
        hasher.update(b"|");
        hasher.update(self.version.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.priority.to_string().as_bytes());
        hasher.update(b"|");
        hasher.update(self.description.as_bytes());
        if let Some(fp) = &self.fingerprint {
            hasher.update(b"|");
            hasher.update(fp.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Runs the step against `db`.
    pub async fn apply(&self, db: &dyn DbExecutor, table: &TableDescriptor) -> StoreResult<()> {
        match &self.operation {
            Operation::Custom(handler) => handler.apply(db, table).await,
            op => match op.to_sql(&self.table) {
                Some(sql) => db.execute_batch(&sql).await,
                None => Ok(()),
            },
        }
    }
}

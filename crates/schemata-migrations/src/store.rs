//! The versioned schema store.
//!
//! [`VersionedSchemaStore`] owns one lazily opened SQLite connection and
//! brings the database to its declared version on first access:
//!
//! - **Create.** A database whose stored version is 0 gets the ledger, every
//!   table, and every step in `(0, target]`.
//! - **Upgrade.** A stored version below the target creates any table that
//!   is physically missing (its steps replay from version 1) and applies the
//!   steps in `(stored, target]`.
//! - **Recreate.** A stored version above the target cannot be undone, so
//!   the database file is deleted and built again through the create path.
//!   All data is lost. This is not a real downgrade.
//!
//! Create and upgrade run in a single transaction together with the ledger
//! writes and the stored-version update. A failing step leaves the stored
//! version and the ledger exactly as they were, and the same `open()` can be
//! retried after the step is fixed. A failure while recreating cannot be
//! rolled back; the store refuses further use until [`reset`] succeeds.
//!
//! The store assumes a single process and a single writer. `reset()` and the
//! recreate path delete files underneath any [`ConnectionHandle`] a caller
//! still holds; dropping those first is the caller's responsibility.
//!
//! [`reset`]: VersionedSchemaStore::reset

use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use schemata_core::logging::store_span;
use schemata_core::{Settings, StoreError, StoreResult};
use schemata_db::{atomic, DbExecutor};
use schemata_db_backends::{
    read_user_version, remove_database_files, DatabaseBackend, DatabaseConfig, SqliteBackend,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::Instrument;

use crate::ledger::{LedgerEntry, MigrationLedger, LEDGER_TABLE};
use crate::scheduler::{MigrationPlan, MigrationScheduler};
use crate::table::TableDescriptor;

/// The connection handed to callers once the schema is current.
pub type ConnectionHandle = Arc<SqliteBackend>;

/// How `open()` brought the database to the declared version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transition {
    /// A never-initialized database was built from scratch.
    Created,
    /// Steps newer than the stored version were applied.
    Upgraded,
    /// The stored version was newer; the file was deleted and rebuilt.
    Recreated,
    /// Nothing to do.
    Unchanged,
}

/// Summary of one `open()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationReport {
    pub transition: Transition,
    /// The stored version found on disk.
    pub from_version: u32,
    /// The declared version now stored.
    pub to_version: u32,
    /// Tables created during the pass.
    pub created_tables: Vec<String>,
    /// Descriptions of the steps that ran, in order.
    pub applied: Vec<String>,
    /// Planned steps the ledger already knew about.
    pub skipped: usize,
}

impl MigrationReport {
    const fn unchanged(version: u32) -> Self {
        Self {
            transition: Transition::Unchanged,
            from_version: version,
            to_version: version,
            created_tables: Vec::new(),
            applied: Vec::new(),
            skipped: 0,
        }
    }
}

#[derive(Default)]
struct StoreState {
    handle: Option<ConnectionHandle>,
    poisoned: Option<String>,
    last_report: Option<MigrationReport>,
}

/// A SQLite database kept at a declared schema version.
pub struct VersionedSchemaStore {
    config: DatabaseConfig,
    target_version: u32,
    tables: Vec<TableDescriptor>,
    ledger: MigrationLedger,
    state: Mutex<StoreState>,
}

impl std::fmt::Debug for VersionedSchemaStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedSchemaStore")
            .field("path", &self.config.path)
            .field("target_version", &self.target_version)
            .field("tables", &self.tables.len())
            .finish_non_exhaustive()
    }
}

impl VersionedSchemaStore {
    /// Creates a store for the database at `identifier` (a file path or
    /// `:memory:`) declared at `target_version`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` if `target_version` is 0, table names
    /// repeat or collide with the ledger table, or any table fails
    /// [`TableDescriptor::validate`] (including steps above
    /// `target_version`). Nothing is opened.
    pub fn new(
        identifier: impl Into<PathBuf>,
        target_version: u32,
        tables: Vec<TableDescriptor>,
    ) -> StoreResult<Self> {
        Self::with_config(DatabaseConfig::sqlite_file(identifier), target_version, tables)
    }

    /// Creates a store whose declared version is the highest step version
    /// across `tables` (at least 1).
    pub fn with_max_version(
        identifier: impl Into<PathBuf>,
        tables: Vec<TableDescriptor>,
    ) -> StoreResult<Self> {
        let target = tables
            .iter()
            .map(TableDescriptor::max_step_version)
            .max()
            .unwrap_or(0)
            .max(1);
        Self::new(identifier, target, tables)
    }

    /// Creates a store using the connection parameters in `settings`.
    pub fn from_settings(
        settings: &Settings,
        target_version: u32,
        tables: Vec<TableDescriptor>,
    ) -> StoreResult<Self> {
        Self::with_config(DatabaseConfig::from_settings(settings), target_version, tables)
    }

    /// Creates a store from explicit connection parameters.
    pub fn with_config(
        config: DatabaseConfig,
        target_version: u32,
        tables: Vec<TableDescriptor>,
    ) -> StoreResult<Self> {
        if target_version == 0 {
            return Err(StoreError::ConfigurationError(
                "Store version must be at least 1".to_string(),
            ));
        }

        let mut names = BTreeSet::new();
        for table in &tables {
            if table.name().eq_ignore_ascii_case(LEDGER_TABLE) {
                return Err(StoreError::ConfigurationError(format!(
                    "Table name '{LEDGER_TABLE}' is reserved for the migration ledger"
                )));
            }
            // SQLite table names are case-insensitive.
            if !names.insert(table.name().to_ascii_lowercase()) {
                return Err(StoreError::ConfigurationError(format!(
                    "Table '{}' is declared more than once",
                    table.name()
                )));
            }
            table.validate(target_version)?;
        }

        tracing::debug!(
            db = %config.path.display(),
            target_version,
            tables = tables.len(),
            "Configured schema store"
        );

        Ok(Self {
            config,
            target_version,
            tables,
            ledger: MigrationLedger::new(),
            state: Mutex::new(StoreState::default()),
        })
    }

    /// The database path, or `:memory:`.
    pub fn identifier(&self) -> String {
        self.config.path.display().to_string()
    }

    pub const fn target_version(&self) -> u32 {
        self.target_version
    }

    pub fn tables(&self) -> &[TableDescriptor] {
        &self.tables
    }

    /// Looks up a configured table by name.
    pub fn table(&self, name: &str) -> Option<&TableDescriptor> {
        self.tables.iter().find(|t| t.name() == name)
    }

    pub async fn is_open(&self) -> bool {
        self.state.lock().await.handle.is_some()
    }

    /// Returns the connection, opening and migrating the database first if
    /// needed.
    ///
    /// Concurrent callers share one initialization. Once open, later calls
    /// return the cached handle without touching the schema.
    ///
    /// # Errors
    ///
    /// Returns `ExecutionError` when a step fails (nothing was committed),
    /// driver errors from opening the file, or `StateError` when an earlier
    /// recreate failed.
    pub async fn open(&self) -> StoreResult<ConnectionHandle> {
        self.open_with_report().await.map(|(handle, _)| handle)
    }

    /// Like [`open`](Self::open), also returning what the call did. A store
    /// that was already open reports [`Transition::Unchanged`].
    pub async fn open_with_report(&self) -> StoreResult<(ConnectionHandle, MigrationReport)> {
        let mut state = self.state.lock().await;

        if let Some(reason) = &state.poisoned {
            return Err(StoreError::StateError(format!(
                "Store '{}' is unusable after a failed recreate ({reason}); reset() it first",
                self.identifier()
            )));
        }
        if let Some(handle) = &state.handle {
            return Ok((
                Arc::clone(handle),
                MigrationReport::unchanged(self.target_version),
            ));
        }

        let span = store_span(&self.identifier(), self.target_version);
        let (handle, report) = self.initialize(&mut state).instrument(span).await?;

        state.handle = Some(Arc::clone(&handle));
        state.last_report = Some(report.clone());
        Ok((handle, report))
    }

    async fn initialize(
        &self,
        state: &mut StoreState,
    ) -> StoreResult<(ConnectionHandle, MigrationReport)> {
        let backend = SqliteBackend::open_with(&self.config)?;
        let stored = backend.user_version().await?;
        let target = self.target_version;
        tracing::debug!(stored_version = stored, "Opened database");

        match stored.cmp(&target) {
            Ordering::Equal => {
                tracing::debug!("Schema is current");
                Ok((Arc::new(backend), MigrationReport::unchanged(target)))
            }
            Ordering::Less => {
                let transition = if stored == 0 {
                    tracing::info!("Creating schema at version {target}");
                    Transition::Created
                } else {
                    tracing::info!("Upgrading schema from version {stored} to {target}");
                    Transition::Upgraded
                };
                let report = self.run_pass(&backend, stored, transition).await?;
                Ok((Arc::new(backend), report))
            }
            Ordering::Greater => {
                tracing::warn!(
                    "Stored version {stored} is newer than declared version {target}; \
                     recreating the database, existing data will be lost"
                );
                match self.recreate(backend, stored).await {
                    Ok(opened) => Ok(opened),
                    Err(e) => {
                        tracing::error!(error = %e, "Recreating the database failed");
                        state.poisoned = Some(e.to_string());
                        Err(StoreError::StateError(format!(
                            "Recreating '{}' after downgrade from version {stored} failed: {e}",
                            self.identifier()
                        )))
                    }
                }
            }
        }
    }

    async fn recreate(
        &self,
        backend: SqliteBackend,
        stored: u32,
    ) -> StoreResult<(ConnectionHandle, MigrationReport)> {
        drop(backend);
        if !self.config.is_memory() {
            remove_database_files(&self.config.path)?;
        }
        let fresh = SqliteBackend::open_with(&self.config)?;
        let mut report = self.run_pass(&fresh, 0, Transition::Recreated).await?;
        report.from_version = stored;
        Ok((Arc::new(fresh), report))
    }

    /// Runs one create/upgrade pass in a single transaction.
    async fn run_pass(
        &self,
        backend: &SqliteBackend,
        from: u32,
        transition: Transition,
    ) -> StoreResult<MigrationReport> {
        let target = self.target_version;
        let tables = &self.tables;
        let ledger = &self.ledger;
        let scheduler = MigrationScheduler::new(tables);

        atomic(backend, |txn| async move {
            let db: &dyn DbExecutor = &*txn;
            ledger.ensure_table(db).await?;

            let mut created = BTreeSet::new();
            for table in tables {
                if backend.table_exists(table.name()).await? {
                    continue;
                }
                tracing::info!(table = table.name(), "Creating table");
                table
                    .create(backend)
                    .await
                    .map_err(|e| StoreError::execution(format!("create table {}", table.name()), e))?;
                created.insert(table.name().to_string());
            }

            let plan = scheduler.plan_with_new_tables(from, target, &created);
            let outcome = scheduler.execute(&plan, db, ledger).await?;
            backend.set_user_version(target).await?;

            tracing::info!(
                applied = outcome.applied.len(),
                skipped = outcome.skipped,
                "Schema is at version {target}"
            );

            Ok(MigrationReport {
                transition,
                from_version: from,
                to_version: target,
                created_tables: created.into_iter().collect(),
                applied: outcome.applied,
                skipped: outcome.skipped,
            })
        })
        .await
    }

    /// Releases the connection. Does nothing if the store is not open.
    pub async fn close(&self) {
        if self.state.lock().await.handle.take().is_some() {
            tracing::debug!(db = %self.config.path.display(), "Closed store");
        }
    }

    /// Closes the store and deletes its database files. Memory stores just
    /// drop their connection. Clears a failed-recreate state.
    ///
    /// Destructive; meant for tests and development.
    pub async fn reset(&self) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        state.handle = None;
        state.last_report = None;
        if !self.config.is_memory() {
            remove_database_files(&self.config.path)?;
        }
        state.poisoned = None;
        tracing::warn!(db = %self.config.path.display(), "Store reset; database deleted");
        Ok(())
    }

    /// Reads the stored version without opening or migrating the store.
    ///
    /// File stores are probed through a separate read-only connection and
    /// report 0 when the file does not exist. Memory stores report the open
    /// connection's version, or 0 when closed.
    pub async fn current_stored_version(&self) -> StoreResult<u32> {
        if self.config.is_memory() {
            let state = self.state.lock().await;
            return match &state.handle {
                Some(handle) => handle.user_version().await,
                None => Ok(0),
            };
        }
        read_user_version(&self.config.path).await
    }

    /// Marks every configured step as applied without running it.
    ///
    /// For databases whose schema predates the ledger. A step is skipped if
    /// its hash is already recorded, or if its `(table, version)` pair had
    /// any ledger row before this call. Returns the number of rows written.
    pub async fn synchronize_ledger(&self) -> StoreResult<usize> {
        let handle = self.open().await?;
        let tables = &self.tables;
        let ledger = &self.ledger;

        let inserted = atomic(&*handle, |txn| async move {
            let db: &dyn DbExecutor = &*txn;
            ledger.ensure_table(db).await?;

            let mut known = BTreeSet::new();
            for table in tables {
                for step in table.steps() {
                    if ledger.has_version(db, table.name(), step.version()).await? {
                        known.insert((table.name(), step.version()));
                    }
                }
            }

            let mut inserted = 0;
            for table in tables {
                for step in table.steps() {
                    if known.contains(&(table.name(), step.version()))
                        || ledger.is_applied(db, table.name(), &step.content_hash()).await?
                    {
                        continue;
                    }
                    ledger.record_applied(db, step).await?;
                    inserted += 1;
                }
            }
            Ok(inserted)
        })
        .await?;

        tracing::info!(inserted, "Synchronized migration ledger");
        Ok(inserted)
    }

    /// Returns the ledger rows, most recently applied first. Opens the store
    /// if needed.
    pub async fn get_applied_migrations(&self) -> StoreResult<Vec<LedgerEntry>> {
        let handle = self.open().await?;
        if !handle.table_exists(LEDGER_TABLE).await? {
            return Ok(Vec::new());
        }
        self.ledger.applied_migrations(&*handle).await
    }

    /// Returns the steps the next `open()` would consider, without opening
    /// the store. Ledger filtering and tables created by the pass are not
    /// taken into account.
    pub async fn pending_plan(&self) -> StoreResult<MigrationPlan<'_>> {
        let stored = self.current_stored_version().await?;
        let scheduler = MigrationScheduler::new(&self.tables);
        Ok(match stored.cmp(&self.target_version) {
            Ordering::Equal => MigrationPlan::default(),
            Ordering::Less => scheduler.plan(stored, self.target_version),
            Ordering::Greater => scheduler.plan(0, self.target_version),
        })
    }

    /// Returns the report of the `open()` that opened the current connection.
    pub async fn last_report(&self) -> Option<MigrationReport> {
        self.state.lock().await.last_report.clone()
    }
}

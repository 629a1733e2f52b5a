//! Table descriptors and the soft-delete helpers that operate on them.

use once_cell::sync::Lazy;
use regex::Regex;
use schemata_core::{StoreError, StoreResult};
use schemata_db::{quote_ident, DbExecutor, Value};
use schemata_db_backends::DatabaseBackend;

use crate::step::MigrationStep;

/// The column used to mark soft-deleted rows unless overridden.
pub const DEFAULT_SOFT_DELETE_COLUMN: &str = "deleted_at";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern is valid"));

/// Checks that `name` is a plain SQL identifier.
///
/// `kind` names what is being checked ("table", "column", "index") and only
/// shows up in the error message.
pub fn validate_identifier(kind: &str, name: &str) -> StoreResult<()> {
    if IDENTIFIER.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::ConfigurationError(format!(
            "Invalid {kind} name '{name}': expected [A-Za-z_][A-Za-z0-9_]*"
        )))
    }
}

/// A table's name, creation DDL, and the ordered migration steps that evolve
/// it.
///
/// The creation DDL describes the table as it was first shipped; later
/// changes arrive as steps. A table added in a later release is created from
/// its DDL and then has every one of its steps applied.
#[derive(Debug, Clone)]
pub struct TableDescriptor {
    name: String,
    creation_schema: String,
    primary_key: String,
    soft_delete: bool,
    soft_delete_column: String,
    steps: Vec<MigrationStep>,
}

impl TableDescriptor {
    /// Creates a descriptor with primary key `id` and soft delete disabled.
    ///
    /// `creation_schema` may contain several `;`-separated statements, e.g. a
    /// `CREATE TABLE` followed by its initial indexes.
    pub fn new(name: impl Into<String>, creation_schema: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            creation_schema: creation_schema.into(),
            primary_key: "id".to_string(),
            soft_delete: false,
            soft_delete_column: DEFAULT_SOFT_DELETE_COLUMN.to_string(),
            steps: Vec::new(),
        }
    }

    /// Sets the primary key column.
    pub fn with_primary_key(mut self, column: impl Into<String>) -> Self {
        self.primary_key = column.into();
        self
    }

    /// Enables soft delete using the default `deleted_at` column.
    pub fn with_soft_delete(mut self) -> Self {
        self.soft_delete = true;
        self
    }

    /// Enables soft delete using `column`.
    pub fn with_soft_delete_column(mut self, column: impl Into<String>) -> Self {
        self.soft_delete = true;
        self.soft_delete_column = column.into();
        self
    }

    /// Appends migration steps, keeping their order.
    pub fn with_steps(mut self, steps: impl IntoIterator<Item = MigrationStep>) -> Self {
        self.steps.extend(steps);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn creation_schema(&self) -> &str {
        &self.creation_schema
    }

    pub fn primary_key(&self) -> &str {
        &self.primary_key
    }

    pub const fn soft_delete_enabled(&self) -> bool {
        self.soft_delete
    }

    pub fn soft_delete_column(&self) -> &str {
        &self.soft_delete_column
    }

    pub fn steps(&self) -> &[MigrationStep] {
        &self.steps
    }

    /// Returns the highest step version, or 0 when there are no steps.
    pub fn max_step_version(&self) -> u32 {
        self.steps.iter().map(MigrationStep::version).max().unwrap_or(0)
    }

    /// Validates the descriptor against the store's declared version.
    ///
    /// # Errors
    ///
    /// Returns `ConfigurationError` for invalid identifiers, empty DDL, steps
    /// owned by another table, version-0 steps, or steps above
    /// `target_version`.
    pub fn validate(&self, target_version: u32) -> StoreResult<()> {
        validate_identifier("table", &self.name)?;
        validate_identifier("column", &self.primary_key)?;
        if self.soft_delete {
            validate_identifier("column", &self.soft_delete_column)?;
        }
        if self.creation_schema.trim().is_empty() {
            return Err(StoreError::ConfigurationError(format!(
                "Table '{}' has an empty creation schema",
                self.name
            )));
        }

        for step in &self.steps {
            if step.table() != self.name {
                return Err(StoreError::ConfigurationError(format!(
                    "Step '{}' belongs to table '{}' but is attached to '{}'",
                    step.description(),
                    step.table(),
                    self.name
                )));
            }
            if step.version() == 0 {
                return Err(StoreError::ConfigurationError(format!(
                    "Step '{}' on '{}' has version 0; versions start at 1",
                    step.description(),
                    self.name
                )));
            }
            if step.version() > target_version {
                return Err(StoreError::ConfigurationError(format!(
                    "Step '{}' on '{}' targets version {} but the store is declared at version {target_version}",
                    step.description(),
                    self.name,
                    step.version()
                )));
            }
        }
        Ok(())
    }

    /// Runs the creation DDL and adds the soft-delete column if the DDL left
    /// it out.
    pub(crate) async fn create(&self, backend: &dyn DatabaseBackend) -> StoreResult<()> {
        backend.execute_batch(&self.creation_schema).await?;
        if !backend.table_exists(&self.name).await? {
            return Err(StoreError::ConfigurationError(format!(
                "Creation schema for '{}' did not create a table with that name",
                self.name
            )));
        }

        if self.soft_delete {
            let columns = backend.column_names(&self.name).await?;
            if !columns.iter().any(|c| c == &self.soft_delete_column) {
                tracing::debug!(
                    table = %self.name,
                    column = %self.soft_delete_column,
                    "Adding soft-delete column"
                );
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {} TEXT",
                    quote_ident(&self.name),
                    quote_ident(&self.soft_delete_column)
                );
                backend.execute_sql(&sql, &[]).await?;
            }
        }
        Ok(())
    }

    // ── Soft delete ─────────────────────────────────────────────────

    fn require_soft_delete(&self, action: &str) -> StoreResult<String> {
        if self.soft_delete {
            Ok(quote_ident(&self.soft_delete_column))
        } else {
            Err(StoreError::StateError(format!(
                "Cannot {action} on '{}': soft delete is not enabled for this table",
                self.name
            )))
        }
    }

    /// Returns the condition selecting rows that are not soft-deleted, or
    /// `None` when soft delete is disabled.
    pub fn live_rows_filter(&self) -> Option<String> {
        self.soft_delete
            .then(|| format!("{} IS NULL", quote_ident(&self.soft_delete_column)))
    }

    /// Marks the live rows matching `filter` as deleted. Returns the number
    /// of rows marked.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if soft delete is not enabled for this table.
    pub async fn soft_delete(
        &self,
        db: &dyn DbExecutor,
        filter: &str,
        params: &[Value],
    ) -> StoreResult<u64> {
        let column = self.require_soft_delete("soft delete")?;
        let now = Value::from(chrono::Utc::now());
        db.update(
            &self.name,
            &[(self.soft_delete_column.as_str(), now)],
            &format!("({filter}) AND {column} IS NULL"),
            params,
        )
        .await
    }

    /// Clears the deletion mark on the soft-deleted rows matching `filter`.
    /// Returns the number of rows restored.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if soft delete is not enabled for this table.
    pub async fn restore(
        &self,
        db: &dyn DbExecutor,
        filter: &str,
        params: &[Value],
    ) -> StoreResult<u64> {
        let column = self.require_soft_delete("restore")?;
        db.update(
            &self.name,
            &[(self.soft_delete_column.as_str(), Value::Null)],
            &format!("({filter}) AND {column} IS NOT NULL"),
            params,
        )
        .await
    }

    /// Physically removes every soft-deleted row. Returns the number removed.
    ///
    /// # Errors
    ///
    /// Returns `StateError` if soft delete is not enabled for this table.
    pub async fn purge_soft_deleted(&self, db: &dyn DbExecutor) -> StoreResult<u64> {
        let column = self.require_soft_delete("purge")?;
        db.delete(&self.name, &format!("{column} IS NOT NULL"), &[])
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::Operation;
    use schemata_db_backends::SqliteBackend;

    const NOTES: &str = "CREATE TABLE notes (id INTEGER PRIMARY KEY, title TEXT NOT NULL)";

    fn step(table: &str, version: u32) -> MigrationStep {
        MigrationStep::new(table, version, format!("v{version}"), Operation::RawSql("SELECT 1".into()))
    }

    // ── Identifiers ─────────────────────────────────────────────────

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("table", "notes").is_ok());
        assert!(validate_identifier("table", "_notes_2").is_ok());
        for bad in ["", "2notes", "notes table", "no-tes", "n\"otes"] {
            let err = validate_identifier("table", bad).unwrap_err();
            assert!(err.is_configuration(), "{bad} should be rejected");
        }
    }

    // ── Validation ──────────────────────────────────────────────────

    #[test]
    fn test_validate_accepts_steps_up_to_target() {
        let table = TableDescriptor::new("notes", NOTES).with_steps([step("notes", 1), step("notes", 3)]);
        assert!(table.validate(3).is_ok());
        assert_eq!(table.max_step_version(), 3);
    }

    #[test]
    fn test_validate_rejects_step_above_target() {
        let table = TableDescriptor::new("notes", NOTES).with_steps([step("notes", 4)]);
        let err = table.validate(3).unwrap_err();
        assert!(matches!(err, StoreError::ConfigurationError(ref m) if m.contains("version 4")));
    }

    #[test]
    fn test_validate_rejects_version_zero() {
        let table = TableDescriptor::new("notes", NOTES).with_steps([step("notes", 0)]);
        assert!(table.validate(1).unwrap_err().is_configuration());
    }

    #[test]
    fn test_validate_rejects_foreign_step() {
        let table = TableDescriptor::new("notes", NOTES).with_steps([step("users", 1)]);
        assert!(table.validate(1).unwrap_err().is_configuration());
    }

    #[test]
    fn test_validate_rejects_empty_schema() {
        assert!(TableDescriptor::new("notes", "  ").validate(1).is_err());
    }

    #[test]
    fn test_defaults() {
        let table = TableDescriptor::new("notes", NOTES);
        assert_eq!(table.primary_key(), "id");
        assert!(!table.soft_delete_enabled());
        assert_eq!(table.soft_delete_column(), "deleted_at");
        assert_eq!(table.live_rows_filter(), None);
        assert_eq!(table.max_step_version(), 0);
    }

    // ── Creation ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_create_adds_missing_soft_delete_column() {
        let backend = SqliteBackend::memory().unwrap();
        let table = TableDescriptor::new("notes", NOTES).with_soft_delete_column("removed_at");
        table.create(&backend).await.unwrap();
        assert_eq!(
            backend.column_names("notes").await.unwrap(),
            vec!["id", "title", "removed_at"]
        );
    }

    #[tokio::test]
    async fn test_create_rejects_schema_for_another_table() {
        let backend = SqliteBackend::memory().unwrap();
        let table = TableDescriptor::new("notes", "CREATE TABLE memos (id INTEGER PRIMARY KEY)");
        let err = table.create(&backend).await.unwrap_err();
        assert!(matches!(err, StoreError::ConfigurationError(ref m) if m.contains("'notes'")));
    }

    #[tokio::test]
    async fn test_create_accepts_name_differing_in_case() {
        let backend = SqliteBackend::memory().unwrap();
        let table = TableDescriptor::new("Notes", NOTES).with_soft_delete();
        table.create(&backend).await.unwrap();
        assert!(backend.table_exists("Notes").await.unwrap());
        assert_eq!(
            backend.column_names("Notes").await.unwrap(),
            vec!["id", "title", "deleted_at"]
        );
    }

    #[tokio::test]
    async fn test_create_keeps_declared_soft_delete_column() {
        let backend = SqliteBackend::memory().unwrap();
        let table = TableDescriptor::new(
            "notes",
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, deleted_at TEXT)",
        )
        .with_soft_delete();
        table.create(&backend).await.unwrap();
        assert_eq!(
            backend.column_names("notes").await.unwrap(),
            vec!["id", "deleted_at"]
        );
    }

    // ── Soft delete ─────────────────────────────────────────────────

    async fn seeded(table: &TableDescriptor) -> SqliteBackend {
        let backend = SqliteBackend::memory().unwrap();
        table.create(&backend).await.unwrap();
        for title in ["a", "b", "c"] {
            backend
                .insert("notes", &[("title", Value::from(title))])
                .await
                .unwrap();
        }
        backend
    }

    #[tokio::test]
    async fn test_soft_delete_restore_purge() {
        let table = TableDescriptor::new("notes", NOTES).with_soft_delete();
        let backend = seeded(&table).await;

        let marked = table
            .soft_delete(&backend, "title IN (?, ?)", &[Value::from("a"), Value::from("b")])
            .await
            .unwrap();
        assert_eq!(marked, 2);

        // Already-deleted rows are not marked twice.
        let again = table
            .soft_delete(&backend, "title = ?", &[Value::from("a")])
            .await
            .unwrap();
        assert_eq!(again, 0);

        let live_sql = format!(
            "SELECT title FROM notes WHERE {}",
            table.live_rows_filter().unwrap()
        );
        let live = backend.query(&live_sql, &[]).await.unwrap();
        assert_eq!(live.len(), 1);

        let restored = table
            .restore(&backend, "title = ?", &[Value::from("b")])
            .await
            .unwrap();
        assert_eq!(restored, 1);

        let purged = table.purge_soft_deleted(&backend).await.unwrap();
        assert_eq!(purged, 1);
        let remaining = backend.query("SELECT title FROM notes ORDER BY title", &[]).await.unwrap();
        let titles: Vec<String> = remaining.iter().map(|r| r.get("title").unwrap()).collect();
        assert_eq!(titles, vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_soft_delete_ops_require_flag() {
        let table = TableDescriptor::new("notes", NOTES);
        let backend = seeded(&table).await;

        let err = table.restore(&backend, "1 = 1", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::StateError(_)));
        assert!(matches!(
            table.soft_delete(&backend, "1 = 1", &[]).await,
            Err(StoreError::StateError(_))
        ));
        assert!(matches!(
            table.purge_soft_deleted(&backend).await,
            Err(StoreError::StateError(_))
        ));
    }
}

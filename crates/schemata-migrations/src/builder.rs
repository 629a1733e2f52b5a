//! Fluent construction of migration steps for one table.
//!
//! ```
//! use schemata_migrations::MigrationStepBuilder;
//!
//! let steps = MigrationStepBuilder::new("users")
//!     .at_version(2)
//!     .add_column("email", "TEXT")
//!     .create_unique_index("idx_users_email", &["email"])
//!     .at_version(3)
//!     .rename_column("name", "full_name")
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(steps.len(), 3);
//! assert_eq!(steps[1].priority(), 1);
//! ```

use std::sync::Arc;

use schemata_core::{StoreError, StoreResult};

use crate::step::{MigrationHandler, MigrationStep, Operation};
use crate::table::validate_identifier;

/// Accumulates [`MigrationStep`]s for one table.
///
/// Every call appends a step at the current version whose priority comes from
/// a counter local to this builder, so declaration order is the default
/// tie-break. The first invalid call is remembered and returned by
/// [`build`](Self::build); later calls are ignored.
#[derive(Debug)]
pub struct MigrationStepBuilder {
    table: String,
    version: u32,
    /// `None` once the counter has passed `i32::MAX`.
    next_priority: Option<i32>,
    steps: Vec<MigrationStep>,
    error: Option<StoreError>,
}

impl MigrationStepBuilder {
    /// Starts a builder for `table` at version 1.
    pub fn new(table: impl Into<String>) -> Self {
        let table = table.into();
        let error = validate_identifier("table", &table).err();
        Self {
            table,
            version: 1,
            next_priority: Some(0),
            steps: Vec::new(),
            error,
        }
    }

    /// Sets the version for the steps added after this call.
    pub fn at_version(mut self, version: u32) -> Self {
        if version == 0 {
            self.fail(StoreError::ConfigurationError(format!(
                "Migration version for '{}' must be at least 1",
                self.table
            )));
        }
        self.version = version;
        self
    }

    /// Overrides the priority of the next step. The counter continues from
    /// `priority + 1`.
    pub fn priority(mut self, priority: i32) -> Self {
        self.next_priority = Some(priority);
        self
    }

    /// Attaches a content fingerprint to the most recently added step.
    pub fn fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        match self.steps.pop() {
            Some(step) => self.steps.push(step.with_fingerprint(fingerprint)),
            None => self.fail(StoreError::ConfigurationError(format!(
                "fingerprint() on '{}' must follow a step",
                self.table
            ))),
        }
        self
    }

    /// Appends raw SQL (one or more `;`-separated statements).
    pub fn sql(self, description: impl Into<String>, sql: impl Into<String>) -> Self {
        self.push(description.into(), Operation::RawSql(sql.into()))
    }

    /// Appends `ALTER TABLE ... ADD COLUMN column definition`.
    pub fn add_column(mut self, column: &str, definition: &str) -> Self {
        self.check("column", column);
        let description = format!("add column {column} {definition}");
        self.push(
            description,
            Operation::AddColumn {
                column: column.to_string(),
                definition: definition.to_string(),
            },
        )
    }

    /// Appends `ALTER TABLE ... RENAME COLUMN from TO to`.
    pub fn rename_column(mut self, from: &str, to: &str) -> Self {
        self.check("column", from);
        self.check("column", to);
        let description = format!("rename column {from} to {to}");
        self.push(
            description,
            Operation::RenameColumn {
                from: from.to_string(),
                to: to.to_string(),
            },
        )
    }

    /// Appends `CREATE INDEX name ON table (columns)`.
    pub fn create_index(self, name: &str, columns: &[&str]) -> Self {
        self.index(name, columns, false)
    }

    /// Appends `CREATE UNIQUE INDEX name ON table (columns)`.
    pub fn create_unique_index(self, name: &str, columns: &[&str]) -> Self {
        self.index(name, columns, true)
    }

    /// Appends `DROP INDEX name`.
    pub fn drop_index(mut self, name: &str) -> Self {
        self.check("index", name);
        let description = format!("drop index {name}");
        self.push(
            description,
            Operation::DropIndex {
                name: name.to_string(),
            },
        )
    }

    /// Appends a custom step run by `handler`.
    pub fn custom(
        self,
        description: impl Into<String>,
        handler: impl MigrationHandler + 'static,
    ) -> Self {
        self.push(description.into(), Operation::Custom(Arc::new(handler)))
    }

    /// Column drops have no safe structured form on SQLite. Always fails the
    /// build with `UnsupportedOperation`; use [`custom`](Self::custom) with
    /// table-recreation logic instead.
    pub fn drop_column(mut self, column: &str) -> Self {
        let msg = format!(
            "Dropping column '{column}' from '{}' needs table recreation; supply a custom step",
            self.table
        );
        self.fail(StoreError::UnsupportedOperation(msg));
        self
    }

    /// Foreign keys cannot be added to an existing SQLite table. Always fails
    /// the build with `UnsupportedOperation`; declare the key in the creation
    /// schema or use a custom step.
    pub fn add_foreign_key(mut self, column: &str, references: &str) -> Self {
        let msg = format!(
            "Adding foreign key '{column}' -> '{references}' on '{}' needs table recreation; \
             declare it at creation time or supply a custom step",
            self.table
        );
        self.fail(StoreError::UnsupportedOperation(msg));
        self
    }

    /// Check constraints cannot be added to an existing SQLite table. Always
    /// fails the build with `UnsupportedOperation`.
    pub fn add_check(mut self, expression: &str) -> Self {
        let msg = format!(
            "Adding check '{expression}' on '{}' needs table recreation; \
             declare it at creation time or supply a custom step",
            self.table
        );
        self.fail(StoreError::UnsupportedOperation(msg));
        self
    }

    /// Returns the accumulated steps.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigurationError` or `UnsupportedOperation`
    /// recorded by an earlier call.
    pub fn build(self) -> StoreResult<Vec<MigrationStep>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.steps),
        }
    }

    fn index(mut self, name: &str, columns: &[&str], unique: bool) -> Self {
        self.check("index", name);
        for column in columns {
            self.check("column", column);
        }
        if columns.is_empty() {
            self.fail(StoreError::ConfigurationError(format!(
                "Index '{name}' on '{}' has no columns",
                self.table
            )));
        }
        let description = format!(
            "create {}index {name} on ({})",
            if unique { "unique " } else { "" },
            columns.join(", ")
        );
        self.push(
            description,
            Operation::CreateIndex {
                name: name.to_string(),
                columns: columns.iter().map(ToString::to_string).collect(),
                unique,
            },
        )
    }

    fn push(mut self, description: String, operation: Operation) -> Self {
        let Some(priority) = self.next_priority else {
            self.fail(StoreError::ConfigurationError(format!(
                "Step '{description}' on '{}' follows a step at priority {}; \
                 set an explicit priority with priority()",
                self.table,
                i32::MAX
            )));
            return self;
        };
        let step = MigrationStep::new(self.table.clone(), self.version, description, operation)
            .with_priority(priority);
        self.next_priority = priority.checked_add(1);
        self.steps.push(step);
        self
    }

    fn check(&mut self, kind: &str, name: &str) {
        if let Err(e) = validate_identifier(kind, name) {
            self.fail(e);
        }
    }

    fn fail(&mut self, err: StoreError) {
        if self.error.is_none() {
            self.error = Some(err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemata_db::DbExecutor;

    use crate::table::TableDescriptor;

    struct Noop;

    #[async_trait::async_trait]
    impl MigrationHandler for Noop {
        async fn apply(&self, _db: &dyn DbExecutor, _table: &TableDescriptor) -> StoreResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_priorities_follow_declaration_order() {
        let steps = MigrationStepBuilder::new("users")
            .at_version(2)
            .sql("first", "SELECT 1")
            .sql("second", "SELECT 2")
            .at_version(3)
            .sql("third", "SELECT 3")
            .build()
            .unwrap();
        let meta: Vec<(u32, i32, &str)> = steps
            .iter()
            .map(|s| (s.version(), s.priority(), s.description()))
            .collect();
        assert_eq!(
            meta,
            vec![(2, 0, "first"), (2, 1, "second"), (3, 2, "third")]
        );
        assert!(steps.iter().all(|s| s.table() == "users"));
    }

    #[test]
    fn test_priority_override_resets_counter() {
        let steps = MigrationStepBuilder::new("users")
            .priority(10)
            .sql("a", "SELECT 1")
            .sql("b", "SELECT 1")
            .priority(-1)
            .sql("c", "SELECT 1")
            .build()
            .unwrap();
        let prios: Vec<i32> = steps.iter().map(MigrationStep::priority).collect();
        assert_eq!(prios, vec![10, 11, -1]);
    }

    #[test]
    fn test_max_priority_is_last_auto_priority() {
        let steps = MigrationStepBuilder::new("t")
            .priority(i32::MAX)
            .sql("last", "SELECT 1")
            .build()
            .unwrap();
        assert_eq!(steps[0].priority(), i32::MAX);

        let err = MigrationStepBuilder::new("t")
            .priority(i32::MAX)
            .sql("a", "SELECT 1")
            .sql("b", "SELECT 1")
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreError::ConfigurationError(_)));
        assert!(err.to_string().contains("'b'"));

        let steps = MigrationStepBuilder::new("t")
            .priority(i32::MAX)
            .sql("a", "SELECT 1")
            .priority(0)
            .sql("b", "SELECT 1")
            .build()
            .unwrap();
        let prios: Vec<i32> = steps.iter().map(MigrationStep::priority).collect();
        assert_eq!(prios, vec![i32::MAX, 0]);
    }

    #[test]
    fn test_default_version_is_one() {
        let steps = MigrationStepBuilder::new("users")
            .add_column("email", "TEXT")
            .build()
            .unwrap();
        assert_eq!(steps[0].version(), 1);
        assert_eq!(steps[0].description(), "add column email TEXT");
        assert_eq!(steps[0].operation().kind(), "add_column");
    }

    #[test]
    fn test_structured_descriptions() {
        let steps = MigrationStepBuilder::new("users")
            .rename_column("name", "full_name")
            .create_index("idx_a", &["a", "b"])
            .create_unique_index("idx_b", &["b"])
            .drop_index("idx_a")
            .custom("backfill", Noop)
            .build()
            .unwrap();
        let descriptions: Vec<&str> = steps.iter().map(MigrationStep::description).collect();
        assert_eq!(
            descriptions,
            vec![
                "rename column name to full_name",
                "create index idx_a on (a, b)",
                "create unique index idx_b on (b)",
                "drop index idx_a",
                "backfill",
            ]
        );
        assert_eq!(steps[4].operation().kind(), "custom");
    }

    #[test]
    fn test_drop_column_unsupported() {
        let err = MigrationStepBuilder::new("users")
            .add_column("email", "TEXT")
            .drop_column("email")
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation(ref m) if m.contains("custom step")));
    }

    #[test]
    fn test_foreign_key_and_check_unsupported() {
        assert!(matches!(
            MigrationStepBuilder::new("users")
                .add_foreign_key("org_id", "orgs.id")
                .build(),
            Err(StoreError::UnsupportedOperation(_))
        ));
        assert!(matches!(
            MigrationStepBuilder::new("users").add_check("age > 0").build(),
            Err(StoreError::UnsupportedOperation(_))
        ));
    }

    #[test]
    fn test_invalid_identifiers_rejected() {
        assert!(MigrationStepBuilder::new("bad table").build().unwrap_err().is_configuration());
        assert!(MigrationStepBuilder::new("users")
            .add_column("e-mail", "TEXT")
            .build()
            .unwrap_err()
            .is_configuration());
        assert!(MigrationStepBuilder::new("users")
            .create_index("idx", &[])
            .build()
            .unwrap_err()
            .is_configuration());
    }

    #[test]
    fn test_version_zero_rejected() {
        let err = MigrationStepBuilder::new("users").at_version(0).build().unwrap_err();
        assert!(matches!(err, StoreError::ConfigurationError(_)));
    }

    #[test]
    fn test_first_error_wins() {
        let err = MigrationStepBuilder::new("users")
            .drop_column("a")
            .add_column("bad name", "TEXT")
            .build()
            .unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedOperation(_)));
    }

    #[test]
    fn test_fingerprint_applies_to_last_step() {
        let steps = MigrationStepBuilder::new("users")
            .sql("a", "SELECT 1")
            .custom("b", Noop)
            .fingerprint("rev-2")
            .build()
            .unwrap();
        assert_eq!(steps[0].fingerprint(), None);
        assert_eq!(steps[1].fingerprint(), Some("rev-2"));
        assert!(MigrationStepBuilder::new("users").fingerprint("x").build().is_err());
    }
}

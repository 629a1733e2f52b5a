//! Ordering and sequential execution of pending migration steps.
//!
//! The [`MigrationScheduler`] collects the steps of every table whose version
//! falls in a half-open interval `(from, to]` and orders them by
//! `(version, priority)`. Ties are broken by table name, then by declaration
//! order within the table, so a plan never depends on the order tables were
//! registered in.

use std::collections::BTreeSet;

use schemata_core::{StoreError, StoreResult};
use schemata_db::DbExecutor;

use crate::ledger::MigrationLedger;
use crate::step::MigrationStep;
use crate::table::TableDescriptor;

/// A step scheduled for execution, with the table that owns it.
#[derive(Debug, Clone, Copy)]
pub struct PlannedStep<'a> {
    pub table: &'a TableDescriptor,
    pub step: &'a MigrationStep,
}

/// An ordered list of steps for one pass.
#[derive(Debug, Clone, Default)]
pub struct MigrationPlan<'a> {
    steps: Vec<PlannedStep<'a>>,
}

impl<'a> MigrationPlan<'a> {
    /// Returns the steps in execution order.
    pub fn steps(&self) -> &[PlannedStep<'a>] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns the descriptions of the planned steps in order.
    pub fn descriptions(&self) -> Vec<&'a str> {
        self.steps.iter().map(|p| p.step.description()).collect()
    }
}

/// What a pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassOutcome {
    /// Descriptions of the steps that ran, in order.
    pub applied: Vec<String>,
    /// How many planned steps the ledger already knew about.
    pub skipped: usize,
}

/// Orders and runs migration steps across a set of tables.
#[derive(Debug, Clone, Copy)]
pub struct MigrationScheduler<'a> {
    tables: &'a [TableDescriptor],
}

impl<'a> MigrationScheduler<'a> {
    pub const fn new(tables: &'a [TableDescriptor]) -> Self {
        Self { tables }
    }

    /// Plans every step with a version in `(from, to]`.
    pub fn plan(&self, from: u32, to: u32) -> MigrationPlan<'a> {
        self.plan_with_new_tables(from, to, &BTreeSet::new())
    }

    /// Plans like [`plan`](Self::plan), except that tables named in
    /// `new_tables` contribute every step in `(0, to]`. Used when a pass
    /// creates tables that did not exist at `from`.
    pub fn plan_with_new_tables(
        &self,
        from: u32,
        to: u32,
        new_tables: &BTreeSet<String>,
    ) -> MigrationPlan<'a> {
        let mut keyed: Vec<((u32, i32, &'a str, usize), PlannedStep<'a>)> = Vec::new();
        for table in self.tables {
            let lower = if new_tables.contains(table.name()) { 0 } else { from };
            for (idx, step) in table.steps().iter().enumerate() {
                if step.version() > lower && step.version() <= to {
                    keyed.push((
                        (step.version(), step.priority(), table.name(), idx),
                        PlannedStep { table, step },
                    ));
                }
            }
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        MigrationPlan {
            steps: keyed.into_iter().map(|(_, planned)| planned).collect(),
        }
    }

    /// Runs `plan` step by step on `db`.
    ///
    /// Steps already in the ledger are skipped. Each executed step is
    /// recorded right after it succeeds. The first failing step stops the
    /// run and is returned as an `ExecutionError` carrying its description;
    /// the caller is expected to roll back the enclosing transaction.
    pub async fn execute(
        &self,
        plan: &MigrationPlan<'_>,
        db: &dyn DbExecutor,
        ledger: &MigrationLedger,
    ) -> StoreResult<PassOutcome> {
        let mut outcome = PassOutcome::default();

        for planned in plan.steps() {
            let step = planned.step;
            let hash = step.content_hash();

            if ledger.is_applied(db, step.table(), &hash).await? {
                tracing::debug!(
                    table = step.table(),
                    version = step.version(),
                    "Skipping already applied step: {}",
                    step.description()
                );
                outcome.skipped += 1;
                continue;
            }

            tracing::debug!(
                table = step.table(),
                version = step.version(),
                priority = step.priority(),
                kind = step.operation().kind(),
                "Applying step: {}",
                step.description()
            );

            if let Err(e) = step.apply(db, planned.table).await {
                tracing::error!(
                    table = step.table(),
                    version = step.version(),
                    error = %e,
                    "Migration step failed: {}",
                    step.description()
                );
                return Err(StoreError::execution(step.description(), e));
            }

            ledger.record_applied(db, step).await?;
            outcome.applied.push(step.description().to_string());
        }

        Ok(outcome)
    }
}

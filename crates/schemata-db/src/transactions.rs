//! Transaction support.
//!
//! This module provides atomic blocks and savepoints on top of any
//! [`DbExecutor`].
//!
//! # Architecture
//!
//! Transactions are managed through the [`TransactionManager`] which wraps a
//! [`DbExecutor`] and tracks nesting depth. The [`atomic()`] function is the
//! primary entry point: it accepts a closure that runs within a transaction
//! and commits or rolls back depending on its result.
//!
//! Calling `atomic()` on a connection that is already inside a transaction
//! (including on a `TransactionManager` handed out by an outer `atomic()`)
//! creates a savepoint rather than a nested transaction.
//!
//! # Examples
//!
//! ```ignore
//! use schemata_db::transactions::atomic;
//!
//! let id = atomic(db, |txn| async move {
//!     txn.execute_sql("INSERT INTO notes (title) VALUES (?)", &[Value::from("a")]).await?;
//!     Ok(())
//! }).await?;
//! ```

use crate::executor::DbExecutor;
use crate::row::Row;
use crate::value::Value;
use schemata_core::{StoreError, StoreResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Counter for generating unique savepoint names.
static SAVEPOINT_COUNTER: AtomicU64 = AtomicU64::new(0);

/// State of a savepoint within a transaction.
#[derive(Debug, Clone)]
pub struct Savepoint {
    /// The unique name of this savepoint.
    pub name: String,
    /// Whether this savepoint has been released.
    pub released: bool,
    /// Whether this savepoint has been rolled back.
    pub rolled_back: bool,
}

impl Savepoint {
    /// Creates a new savepoint with an auto-generated unique name.
    pub fn new() -> Self {
        let id = SAVEPOINT_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self {
            name: format!("sp_{id}"),
            released: false,
            rolled_back: false,
        }
    }
}

impl Default for Savepoint {
    fn default() -> Self {
        Self::new()
    }
}

/// Manages transaction state for a database connection.
///
/// Depth 0 means no transaction is open through this manager. The first
/// [`begin`](Self::begin) issues `BEGIN`, or a `SAVEPOINT` if the wrapped
/// connection already reports an open transaction; deeper calls always use
/// savepoints.
pub struct TransactionManager<'a> {
    /// The underlying database executor.
    db: &'a dyn DbExecutor,
    /// Current nesting depth.
    depth: Mutex<u32>,
    /// Whether the outermost level of this manager is a savepoint.
    outer_is_savepoint: Mutex<bool>,
    /// Stack of active savepoints.
    savepoints: Mutex<Vec<Savepoint>>,
}

impl<'a> TransactionManager<'a> {
    /// Creates a new transaction manager for the given executor.
    pub fn new(db: &'a dyn DbExecutor) -> Self {
        Self {
            db,
            depth: Mutex::new(0),
            outer_is_savepoint: Mutex::new(false),
            savepoints: Mutex::new(Vec::new()),
        }
    }

    /// Returns the current transaction nesting depth.
    pub async fn depth(&self) -> u32 {
        *self.depth.lock().await
    }

    /// Returns a reference to the underlying executor.
    pub fn executor(&self) -> &dyn DbExecutor {
        self.db
    }

    /// Begins a new transaction or creates a savepoint if already in one.
    ///
    /// This is called automatically by [`atomic()`] and should not normally
    /// be called directly.
    pub async fn begin(&self) -> StoreResult<()> {
        let mut depth = self.depth.lock().await;
        if *depth == 0 && !self.db.in_transaction().await? {
            self.db.execute_sql("BEGIN", &[]).await?;
            *self.outer_is_savepoint.lock().await = false;
        } else {
            if *depth == 0 {
                *self.outer_is_savepoint.lock().await = true;
            }
            let sp = Savepoint::new();
            let sql = format!("SAVEPOINT {}", sp.name);
            self.db.execute_sql(&sql, &[]).await?;
            self.savepoints.lock().await.push(sp);
        }
        *depth += 1;
        Ok(())
    }

    /// Commits the current transaction or releases the current savepoint.
    pub async fn commit(&self) -> StoreResult<()> {
        let mut depth = self.depth.lock().await;
        if *depth == 0 {
            return Err(StoreError::DatabaseError(
                "Cannot commit: not in a transaction".to_string(),
            ));
        }

        if *depth == 1 && !*self.outer_is_savepoint.lock().await {
            self.db.execute_sql("COMMIT", &[]).await?;
        } else {
            let mut savepoints = self.savepoints.lock().await;
            if let Some(mut sp) = savepoints.pop() {
                let sql = format!("RELEASE SAVEPOINT {}", sp.name);
                self.db.execute_sql(&sql, &[]).await?;
                sp.released = true;
            }
        }
        *depth -= 1;
        Ok(())
    }

    /// Rolls back the current transaction or savepoint.
    pub async fn rollback(&self) -> StoreResult<()> {
        let mut depth = self.depth.lock().await;
        if *depth == 0 {
            return Err(StoreError::DatabaseError(
                "Cannot rollback: not in a transaction".to_string(),
            ));
        }

        if *depth == 1 && !*self.outer_is_savepoint.lock().await {
            self.db.execute_sql("ROLLBACK", &[]).await?;
        } else {
            let mut savepoints = self.savepoints.lock().await;
            if let Some(mut sp) = savepoints.pop() {
                // ROLLBACK TO leaves the savepoint on the stack; release it too.
                let sql = format!("ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}", sp.name);
                self.db.execute_batch(&sql).await?;
                sp.rolled_back = true;
            }
        }
        *depth -= 1;
        Ok(())
    }
}

#[async_trait::async_trait]
impl DbExecutor for TransactionManager<'_> {
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> StoreResult<u64> {
        self.db.execute_sql(sql, params).await
    }

    async fn execute_batch(&self, sql: &str) -> StoreResult<()> {
        self.db.execute_batch(sql).await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>> {
        self.db.query(sql, params).await
    }

    async fn query_one(&self, sql: &str, params: &[Value]) -> StoreResult<Row> {
        self.db.query_one(sql, params).await
    }

    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StoreResult<i64> {
        self.db.insert_returning_id(sql, params).await
    }

    async fn in_transaction(&self) -> StoreResult<bool> {
        if *self.depth.lock().await > 0 {
            return Ok(true);
        }
        self.db.in_transaction().await
    }
}

/// Executes a closure within a database transaction.
///
/// If the closure returns `Ok`, the transaction is committed. If it returns
/// `Err`, the transaction is rolled back and the closure's error is returned
/// even if the rollback itself fails. Nested calls create savepoints.
pub async fn atomic<'a, F, Fut, T>(db: &'a dyn DbExecutor, f: F) -> StoreResult<T>
where
    F: FnOnce(Arc<TransactionManager<'a>>) -> Fut,
    Fut: std::future::Future<Output = StoreResult<T>>,
{
    let txn = Arc::new(TransactionManager::new(db));
    txn.begin().await?;

    match f(Arc::clone(&txn)).await {
        Ok(result) => {
            txn.commit().await?;
            Ok(result)
        }
        Err(e) => {
            let _ = txn.rollback().await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;

    /// A mock database executor that records SQL statements.
    struct MockDb {
        statements: Mutex<Vec<String>>,
        open_txn: AtomicBool,
    }

    impl MockDb {
        fn new() -> Self {
            Self {
                statements: Mutex::new(Vec::new()),
                open_txn: AtomicBool::new(false),
            }
        }

        fn inside_transaction() -> Self {
            let db = Self::new();
            db.open_txn.store(true, Ordering::SeqCst);
            db
        }

        async fn statements(&self) -> Vec<String> {
            self.statements.lock().await.clone()
        }
    }

    #[async_trait::async_trait]
    impl DbExecutor for MockDb {
        async fn execute_sql(&self, sql: &str, _params: &[Value]) -> StoreResult<u64> {
            self.statements.lock().await.push(sql.to_string());
            Ok(1)
        }

        async fn execute_batch(&self, sql: &str) -> StoreResult<()> {
            self.statements.lock().await.push(sql.to_string());
            Ok(())
        }

        async fn query(&self, _sql: &str, _params: &[Value]) -> StoreResult<Vec<Row>> {
            Ok(Vec::new())
        }

        async fn in_transaction(&self) -> StoreResult<bool> {
            Ok(self.open_txn.load(Ordering::SeqCst))
        }
    }

    // ── atomic() ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_atomic_commits_on_ok() {
        let db = MockDb::new();
        let result = atomic(&db, |txn| async move {
            txn.execute_sql("INSERT INTO t VALUES (1)", &[]).await?;
            Ok(42)
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(
            db.statements().await,
            vec!["BEGIN", "INSERT INTO t VALUES (1)", "COMMIT"]
        );
    }

    #[tokio::test]
    async fn test_atomic_rolls_back_on_err() {
        let db = MockDb::new();
        let result: StoreResult<()> = atomic(&db, |txn| async move {
            txn.execute_sql("INSERT INTO t VALUES (1)", &[]).await?;
            Err(StoreError::DatabaseError("boom".into()))
        })
        .await;

        assert!(matches!(result, Err(StoreError::DatabaseError(ref m)) if m == "boom"));
        assert_eq!(
            db.statements().await,
            vec!["BEGIN", "INSERT INTO t VALUES (1)", "ROLLBACK"]
        );
    }

    #[tokio::test]
    async fn test_nested_atomic_uses_savepoint() {
        let db = MockDb::new();
        atomic(&db, |outer| async move {
            atomic(&*outer, |inner| async move {
                inner.execute_sql("UPDATE t SET x = 1", &[]).await?;
                Ok(())
            })
            .await
        })
        .await
        .unwrap();

        let stmts = db.statements().await;
        assert_eq!(stmts[0], "BEGIN");
        assert!(stmts[1].starts_with("SAVEPOINT sp_"));
        assert_eq!(stmts[2], "UPDATE t SET x = 1");
        assert!(stmts[3].starts_with("RELEASE SAVEPOINT sp_"));
        assert_eq!(stmts[4], "COMMIT");
    }

    #[tokio::test]
    async fn test_atomic_on_open_connection_uses_savepoint() {
        let db = MockDb::inside_transaction();
        let _: StoreResult<()> = atomic(&db, |_txn| async move {
            Err(StoreError::StateError("inner".into()))
        })
        .await;

        let stmts = db.statements().await;
        assert_eq!(stmts.len(), 2);
        assert!(stmts[0].starts_with("SAVEPOINT sp_"));
        assert!(stmts[1].starts_with("ROLLBACK TO SAVEPOINT sp_"));
        assert!(!stmts.iter().any(|s| s == "BEGIN" || s == "ROLLBACK"));
    }

    // ── TransactionManager ──────────────────────────────────────────

    #[tokio::test]
    async fn test_commit_without_begin_fails() {
        let db = MockDb::new();
        let txn = TransactionManager::new(&db);
        assert!(txn.commit().await.is_err());
        assert!(txn.rollback().await.is_err());
    }

    #[tokio::test]
    async fn test_depth_tracking() {
        let db = MockDb::new();
        let txn = TransactionManager::new(&db);
        assert_eq!(txn.depth().await, 0);
        txn.begin().await.unwrap();
        txn.begin().await.unwrap();
        assert_eq!(txn.depth().await, 2);
        assert!(txn.in_transaction().await.unwrap());
        txn.commit().await.unwrap();
        txn.commit().await.unwrap();
        assert_eq!(txn.depth().await, 0);
    }

    #[test]
    fn test_savepoint_names_unique() {
        let a = Savepoint::new();
        let b = Savepoint::default();
        assert_ne!(a.name, b.name);
        assert!(!a.released && !a.rolled_back);
    }
}

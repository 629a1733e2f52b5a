//! The database executor trait.
//!
//! [`DbExecutor`] is the connection handle contract. The schema engine hands
//! it to custom migration steps, and the CRUD layer built on top of a store
//! uses it for `query`/`insert`/`update`/`delete`. Transactions are run with
//! [`atomic`](crate::transactions::atomic).
//!
//! The trait is implemented by `SqliteBackend` in the `schemata-db-backends`
//! crate and by [`TransactionManager`](crate::transactions::TransactionManager),
//! which forwards to the connection it wraps.

use crate::row::Row;
use crate::value::Value;
use schemata_core::{StoreError, StoreResult};

/// Quotes an SQL identifier, doubling any embedded double quotes.
///
/// # Examples
///
/// ```
/// use schemata_db::quote_ident;
///
/// assert_eq!(quote_ident("users"), "\"users\"");
/// assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
/// ```
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Minimal async database executor trait.
///
/// Required methods cover raw statement execution; the row helpers
/// (`insert`, `update`, `delete`) are built on top of them.
#[async_trait::async_trait]
pub trait DbExecutor: Send + Sync {
    /// Runs a SQL statement that does not return rows.
    /// Returns the number of rows affected.
    async fn execute_sql(&self, sql: &str, params: &[Value]) -> StoreResult<u64>;

    /// Runs one or more `;`-separated statements without parameters.
    async fn execute_batch(&self, sql: &str) -> StoreResult<()>;

    /// Runs a SQL query and returns all result rows.
    async fn query(&self, sql: &str, params: &[Value]) -> StoreResult<Vec<Row>>;

    /// Runs a SQL query and returns exactly one row.
    /// Returns `DoesNotExist` if no rows, `MultipleObjectsReturned` if more than one.
    async fn query_one(&self, sql: &str, params: &[Value]) -> StoreResult<Row> {
        let rows = self.query(sql, params).await?;
        let count = rows.len();
        let mut iter = rows.into_iter();
        match (iter.next(), count) {
            (Some(row), 1) => Ok(row),
            (None, _) => Err(StoreError::DoesNotExist("No rows returned".to_string())),
            _ => Err(StoreError::MultipleObjectsReturned(format!(
                "Expected 1 row, got {count}"
            ))),
        }
    }

    /// Executes an INSERT and returns the last inserted row ID.
    async fn insert_returning_id(&self, sql: &str, params: &[Value]) -> StoreResult<i64> {
        self.execute_sql(sql, params).await?;
        let row = self.query_one("SELECT last_insert_rowid() AS id", &[]).await?;
        row.get::<i64>("id")
    }

    /// Returns `true` if the connection is currently inside a transaction.
    async fn in_transaction(&self) -> StoreResult<bool> {
        Ok(false)
    }

    /// Inserts one row and returns its row ID.
    async fn insert(&self, table: &str, values: &[(&str, Value)]) -> StoreResult<i64> {
        if values.is_empty() {
            let sql = format!("INSERT INTO {} DEFAULT VALUES", quote_ident(table));
            return self.insert_returning_id(&sql, &[]).await;
        }
        let columns: Vec<String> = values.iter().map(|(c, _)| quote_ident(c)).collect();
        let placeholders = vec!["?"; values.len()].join(", ");
        let params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            quote_ident(table),
            columns.join(", ")
        );
        self.insert_returning_id(&sql, &params).await
    }

    /// Updates the rows matching `filter` (an SQL condition using `?`
    /// placeholders bound to `filter_params`). Returns the number of rows changed.
    async fn update(
        &self,
        table: &str,
        values: &[(&str, Value)],
        filter: &str,
        filter_params: &[Value],
    ) -> StoreResult<u64> {
        if values.is_empty() {
            return Ok(0);
        }
        let assignments: Vec<String> = values
            .iter()
            .map(|(c, _)| format!("{} = ?", quote_ident(c)))
            .collect();
        let mut params: Vec<Value> = values.iter().map(|(_, v)| v.clone()).collect();
        params.extend_from_slice(filter_params);
        let sql = format!(
            "UPDATE {} SET {} WHERE {filter}",
            quote_ident(table),
            assignments.join(", ")
        );
        self.execute_sql(&sql, &params).await
    }

    /// Deletes the rows matching `filter`. Returns the number of rows removed.
    async fn delete(&self, table: &str, filter: &str, filter_params: &[Value]) -> StoreResult<u64> {
        let sql = format!("DELETE FROM {} WHERE {filter}", quote_ident(table));
        self.execute_sql(&sql, filter_params).await
    }
}

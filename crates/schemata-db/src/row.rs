//! Result rows returned by [`DbExecutor::query`](crate::DbExecutor::query).

use schemata_core::StoreError;

use crate::value::Value;

/// A generic database row passed from backends to callers.
///
/// `Row` holds a list of column names and their corresponding values. It
/// provides typed access via the [`get`](Row::get) method.
#[derive(Debug, Clone)]
pub struct Row {
    columns: Vec<String>,
    values: Vec<Value>,
}

impl Row {
    /// Creates a new row from column names and values.
    ///
    /// # Panics
    ///
    /// Panics if the number of columns does not match the number of values.
    pub fn new(columns: Vec<String>, values: Vec<Value>) -> Self {
        assert_eq!(
            columns.len(),
            values.len(),
            "Row column count must match value count"
        );
        Self { columns, values }
    }

    /// Returns the column names.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Returns the number of columns.
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns `true` if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Gets a typed value by column name.
    ///
    /// # Errors
    ///
    /// Returns an error if the column does not exist or the value cannot be
    /// converted to the requested type.
    pub fn get<T: FromValue>(&self, column: &str) -> Result<T, StoreError> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .ok_or_else(|| {
                StoreError::DatabaseError(format!("Column '{column}' not found in row"))
            })?;
        T::from_value(&self.values[idx])
    }

    /// Gets a typed value by column index.
    ///
    /// # Errors
    ///
    /// Returns an error if the index is out of bounds or the value cannot be
    /// converted to the requested type.
    pub fn get_by_index<T: FromValue>(&self, idx: usize) -> Result<T, StoreError> {
        if idx >= self.values.len() {
            return Err(StoreError::DatabaseError(format!(
                "Column index {idx} out of bounds (row has {} columns)",
                self.values.len()
            )));
        }
        T::from_value(&self.values[idx])
    }

    /// Returns a reference to the raw Value at the given column name.
    pub fn get_value(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .map(|idx| &self.values[idx])
    }
}

/// Trait for converting a [`Value`] to a concrete Rust type.
pub trait FromValue: Sized {
    /// Attempts to convert a value reference to this type.
    fn from_value(value: &Value) -> Result<Self, StoreError>;
}

fn mismatch(expected: &str, value: &Value) -> StoreError {
    StoreError::DatabaseError(format!("Expected {expected}, got {value:?}"))
}

impl FromValue for i64 {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Int(i) => Ok(*i),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for i32 {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Int(i) => i32::try_from(*i).map_err(|e| {
                StoreError::DatabaseError(format!("Int value out of i32 range: {e}"))
            }),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for u32 {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Int(i) => u32::try_from(*i).map_err(|e| {
                StoreError::DatabaseError(format!("Int value out of u32 range: {e}"))
            }),
            _ => Err(mismatch("Int", value)),
        }
    }
}

impl FromValue for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Float(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            _ => Err(mismatch("Float", value)),
        }
    }
}

impl FromValue for bool {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        // SQLite stores booleans as integers.
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(i) => Ok(*i != 0),
            _ => Err(mismatch("Bool", value)),
        }
    }
}

impl FromValue for String {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::String(s) => Ok(s.clone()),
            _ => Err(mismatch("String", value)),
        }
    }
}

impl FromValue for chrono::DateTime<chrono::Utc> {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::DateTimeTz(dt) => Ok(*dt),
            Value::String(s) => chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .map_err(|e| StoreError::DatabaseError(format!("Invalid timestamp '{s}': {e}"))),
            _ => Err(mismatch("DateTime", value)),
        }
    }
}

impl FromValue for Value {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        Ok(value.clone())
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: &Value) -> Result<Self, StoreError> {
        match value {
            Value::Null => Ok(None),
            _ => T::from_value(value).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Row {
        Row::new(
            vec!["id".into(), "name".into(), "deleted_at".into()],
            vec![Value::Int(7), Value::from("alice"), Value::Null],
        )
    }

    #[test]
    fn test_row_get_typed() {
        let row = sample();
        assert_eq!(row.get::<i64>("id").unwrap(), 7);
        assert_eq!(row.get::<String>("name").unwrap(), "alice");
        assert_eq!(row.get::<Option<String>>("deleted_at").unwrap(), None);
        assert_eq!(row.len(), 3);
        assert!(!row.is_empty());
    }

    #[test]
    fn test_row_get_missing_column() {
        let err = sample().get::<i64>("nope").unwrap_err();
        assert!(err.to_string().contains("Column 'nope' not found"));
    }

    #[test]
    fn test_row_get_by_index_out_of_bounds() {
        assert!(sample().get_by_index::<i64>(5).is_err());
        assert_eq!(sample().get_by_index::<i64>(0).unwrap(), 7);
    }

    #[test]
    fn test_row_type_mismatch() {
        assert!(sample().get::<i64>("name").is_err());
    }

    #[test]
    fn test_bool_from_sqlite_integer() {
        assert!(bool::from_value(&Value::Int(1)).unwrap());
        assert!(!bool::from_value(&Value::Int(0)).unwrap());
    }

    #[test]
    fn test_u32_rejects_negative() {
        assert!(u32::from_value(&Value::Int(-1)).is_err());
        assert_eq!(u32::from_value(&Value::Int(3)).unwrap(), 3);
    }

    #[test]
    fn test_datetime_from_rfc3339_string() {
        let dt = chrono::DateTime::<chrono::Utc>::from_value(&Value::from(
            "2024-03-01T10:00:00+00:00",
        ))
        .unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-03-01T10:00:00+00:00");
        assert!(chrono::DateTime::<chrono::Utc>::from_value(&Value::from("yesterday")).is_err());
    }

    #[test]
    #[should_panic(expected = "Row column count must match value count")]
    fn test_row_new_mismatch_panics() {
        let _ = Row::new(vec!["a".into()], vec![]);
    }
}

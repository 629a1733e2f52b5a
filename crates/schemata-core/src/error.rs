//! Core error types for schemata.
//!
//! This module provides the [`StoreError`] enum covering configuration
//! mistakes, unsupported schema operations, failing migration steps, state
//! misuse, and the driver-level failures surfaced by database backends.

use thiserror::Error;

/// The primary error type for schemata.
///
/// Configuration and unsupported-operation errors are caller bugs: they are
/// raised eagerly while a store or its tables are being built and are never
/// worth retrying. Execution errors surface from inside a transactional
/// create/upgrade pass, so the stored schema version is unchanged when they
/// are returned and the same `open()` may be retried once the step is fixed.
#[derive(Error, Debug)]
pub enum StoreError {
    // ── Configuration ────────────────────────────────────────────────

    /// The static store configuration is invalid (a step targets a version
    /// above the declared one, duplicate table names, bad identifiers, ...).
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    // ── Schema operations ────────────────────────────────────────────

    /// A structured schema operation has no safe lowering for the engine.
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// A migration step failed while being applied.
    #[error("Migration step '{description}' failed: {source}")]
    ExecutionError {
        /// The description of the failing step.
        description: String,
        /// The underlying failure.
        #[source]
        source: Box<StoreError>,
    },

    /// An operation was invoked on a table or store in the wrong state.
    #[error("Invalid state: {0}")]
    StateError(String),

    // ── Database errors ──────────────────────────────────────────────

    /// Raised when a query expected exactly one result but found none.
    #[error("Object does not exist: {0}")]
    DoesNotExist(String),

    /// Raised when a query expected exactly one result but found multiple.
    #[error("Multiple objects returned when one expected: {0}")]
    MultipleObjectsReturned(String),

    /// A generic database error.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// A database integrity constraint was violated.
    #[error("Integrity error: {0}")]
    IntegrityError(String),

    /// An operational database error (open failure, pragma failure, etc.).
    #[error("Operational error: {0}")]
    OperationalError(String),

    // ── Serialization ────────────────────────────────────────────────

    /// An error occurred during serialization or deserialization.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // ── IO ───────────────────────────────────────────────────────────

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl StoreError {
    /// Wraps `source` as the failure of the step described by `description`.
    pub fn execution(description: impl Into<String>, source: Self) -> Self {
        Self::ExecutionError {
            description: description.into(),
            source: Box::new(source),
        }
    }

    /// Returns `true` for errors caused by invalid static configuration.
    pub const fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigurationError(_) | Self::UnsupportedOperation(_)
        )
    }

    /// Returns `true` if retrying the failed call may succeed.
    ///
    /// Only failures that happen inside a rolled-back transaction qualify.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExecutionError { .. } | Self::DatabaseError(_) | Self::OperationalError(_)
        )
    }

    /// Returns the description of the failing step for execution errors.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            Self::ExecutionError { description, .. } => Some(description),
            _ => None,
        }
    }
}

/// A convenience type alias for `Result<T, StoreError>`.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_error_display() {
        let err = StoreError::execution(
            "add column email",
            StoreError::DatabaseError("duplicate column name: email".into()),
        );
        assert_eq!(
            err.to_string(),
            "Migration step 'add column email' failed: Database error: duplicate column name: email"
        );
        assert_eq!(err.failed_step(), Some("add column email"));
    }

    #[test]
    fn test_execution_error_source() {
        let err = StoreError::execution("step", StoreError::IntegrityError("unique".into()));
        let source = std::error::Error::source(&err).unwrap();
        assert_eq!(source.to_string(), "Integrity error: unique");
    }

    #[test]
    fn test_is_configuration() {
        assert!(StoreError::ConfigurationError("x".into()).is_configuration());
        assert!(StoreError::UnsupportedOperation("x".into()).is_configuration());
        assert!(!StoreError::DatabaseError("x".into()).is_configuration());
        assert!(!StoreError::StateError("x".into()).is_configuration());
    }

    #[test]
    fn test_is_retryable() {
        assert!(StoreError::execution("s", StoreError::DatabaseError("x".into())).is_retryable());
        assert!(StoreError::OperationalError("locked".into()).is_retryable());
        assert!(!StoreError::ConfigurationError("x".into()).is_retryable());
        assert!(!StoreError::StateError("x".into()).is_retryable());
    }

    #[test]
    fn test_failed_step_none_for_other_errors() {
        assert!(StoreError::DoesNotExist("row".into()).failed_step().is_none());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err: StoreError = io_err.into();
        assert!(err.to_string().contains("file missing"));
        assert!(!err.is_retryable());
    }
}

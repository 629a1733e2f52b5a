//! Settings loading from configuration files.
//!
//! This module provides functions to load [`Settings`] from TOML files, JSON
//! files, and to apply environment variable overrides.
//!
//! ## Loading Order
//!
//! 1. Start with default settings.
//! 2. Load from a TOML or JSON file (overriding defaults).
//! 3. Apply environment variable overrides (highest priority).
//!
//! ## Environment Variable Mapping
//!
//! | Env Var | Setting |
//! |---|---|
//! | `SCHEMATA_DATABASE` | `database` |
//! | `SCHEMATA_JOURNAL_MODE` | `journal_mode` |
//! | `SCHEMATA_FOREIGN_KEYS` | `foreign_keys` |
//! | `SCHEMATA_BUSY_TIMEOUT_MS` | `busy_timeout_ms` |
//! | `SCHEMATA_DEBUG` | `debug` |
//! | `SCHEMATA_LOG_LEVEL` | `log_level` |
//!
//! ## Examples
//!
//! ```rust,no_run
//! use schemata_core::settings_loader;
//!
//! let settings = settings_loader::from_toml_file_with_env("config/store.toml").unwrap();
//! ```

use std::path::Path;

use crate::error::StoreError;
use crate::settings::Settings;

/// Loads settings from a TOML string.
///
/// Any fields not present in the TOML keep their default values.
///
/// # Errors
///
/// Returns an error if the TOML is malformed or cannot be deserialized.
pub fn from_toml_str(toml_str: &str) -> Result<Settings, StoreError> {
    // Go through serde_json::Value so the document can be merged over the
    // serialized defaults.
    let toml_value: toml::Value = toml::from_str(toml_str)
        .map_err(|e| StoreError::ConfigurationError(format!("Failed to parse TOML: {e}")))?;

    merge_over_defaults(toml_to_json(toml_value), "TOML")
}

/// Loads settings from a TOML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Settings, StoreError> {
    let content = read_config(path.as_ref(), "TOML")?;
    from_toml_str(&content)
}

/// Loads settings from a TOML file and then applies environment variable overrides.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the TOML is malformed.
pub fn from_toml_file_with_env(path: impl AsRef<Path>) -> Result<Settings, StoreError> {
    let mut settings = from_toml_file(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Loads settings from a JSON string.
///
/// # Errors
///
/// Returns an error if the JSON is malformed or cannot be deserialized.
pub fn from_json_str(json_str: &str) -> Result<Settings, StoreError> {
    let json_value: serde_json::Value = serde_json::from_str(json_str)
        .map_err(|e| StoreError::ConfigurationError(format!("Failed to parse JSON: {e}")))?;

    merge_over_defaults(json_value, "JSON")
}

/// Loads settings from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the JSON is malformed.
pub fn from_json_file(path: impl AsRef<Path>) -> Result<Settings, StoreError> {
    let content = read_config(path.as_ref(), "JSON")?;
    from_json_str(&content)
}

/// Loads settings from just environment variables (starting from defaults).
pub fn from_env() -> Settings {
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings);
    settings
}

/// Applies environment variable overrides to a settings struct.
///
/// Boolean variables accept "true"/"1"/"yes" (case-insensitive) as true and
/// anything else as false. Numeric variables that fail to parse are ignored.
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Ok(val) = std::env::var("SCHEMATA_DATABASE") {
        settings.database = val;
    }

    if let Ok(val) = std::env::var("SCHEMATA_JOURNAL_MODE") {
        settings.journal_mode = val;
    }

    if let Ok(val) = std::env::var("SCHEMATA_FOREIGN_KEYS") {
        settings.foreign_keys = parse_bool(&val);
    }

    if let Ok(val) = std::env::var("SCHEMATA_BUSY_TIMEOUT_MS") {
        if let Ok(ms) = val.parse::<u64>() {
            settings.busy_timeout_ms = ms;
        }
    }

    if let Ok(val) = std::env::var("SCHEMATA_DEBUG") {
        settings.debug = parse_bool(&val);
    }

    if let Ok(val) = std::env::var("SCHEMATA_LOG_LEVEL") {
        settings.log_level = val;
    }
}

// ============================================================
// Helpers
// ============================================================

fn parse_bool(val: &str) -> bool {
    matches!(val.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn read_config(path: &Path, format: &str) -> Result<String, StoreError> {
    std::fs::read_to_string(path).map_err(|e| {
        StoreError::ConfigurationError(format!(
            "Failed to read {format} file '{}': {e}",
            path.display()
        ))
    })
}

fn merge_over_defaults(value: serde_json::Value, format: &str) -> Result<Settings, StoreError> {
    let default_json = serde_json::to_value(Settings::default()).map_err(|e| {
        StoreError::ConfigurationError(format!("Failed to serialize default settings: {e}"))
    })?;

    let merged = merge_json(default_json, value);
    serde_json::from_value(merged).map_err(|e| {
        StoreError::ConfigurationError(format!("Failed to deserialize settings from {format}: {e}"))
    })
}

/// Converts a TOML value to a `serde_json::Value`.
fn toml_to_json(value: toml::Value) -> serde_json::Value {
    match value {
        toml::Value::String(s) => serde_json::Value::String(s),
        toml::Value::Integer(i) => serde_json::json!(i),
        toml::Value::Float(f) => serde_json::json!(f),
        toml::Value::Boolean(b) => serde_json::Value::Bool(b),
        toml::Value::Datetime(dt) => serde_json::Value::String(dt.to_string()),
        toml::Value::Array(arr) => {
            serde_json::Value::Array(arr.into_iter().map(toml_to_json).collect())
        }
        toml::Value::Table(table) => {
            let map: serde_json::Map<String, serde_json::Value> = table
                .into_iter()
                .map(|(k, v)| (k, toml_to_json(v)))
                .collect();
            serde_json::Value::Object(map)
        }
    }
}

/// Deep-merges two JSON values. The `override_val` takes precedence.
fn merge_json(base: serde_json::Value, override_val: serde_json::Value) -> serde_json::Value {
    match (base, override_val) {
        (serde_json::Value::Object(mut base_map), serde_json::Value::Object(override_map)) => {
            for (key, override_v) in override_map {
                let merged = if let Some(base_v) = base_map.remove(&key) {
                    merge_json(base_v, override_v)
                } else {
                    override_v
                };
                base_map.insert(key, merged);
            }
            serde_json::Value::Object(base_map)
        }
        (_, override_val) => override_val,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── TOML loading ────────────────────────────────────────────────

    #[test]
    fn test_from_toml_str_basic() {
        let toml = r#"
            database = "/var/lib/app/notes.db"
            debug = false
            log_level = "debug"
        "#;

        let settings = from_toml_str(toml).unwrap();
        assert_eq!(settings.database, "/var/lib/app/notes.db");
        assert!(!settings.debug);
        assert_eq!(settings.log_level, "debug");
        // Defaults preserved
        assert_eq!(settings.journal_mode, "WAL");
        assert!(settings.foreign_keys);
    }

    #[test]
    fn test_from_toml_str_numeric() {
        let settings = from_toml_str("busy_timeout_ms = 250").unwrap();
        assert_eq!(settings.busy_timeout_ms, 250);
    }

    #[test]
    fn test_from_toml_str_empty_is_default() {
        let settings = from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_from_toml_str_malformed() {
        let result = from_toml_str("database = ");
        assert!(matches!(result, Err(StoreError::ConfigurationError(_))));
    }

    #[test]
    fn test_from_toml_str_wrong_type() {
        let result = from_toml_str("foreign_keys = \"sometimes\"");
        assert!(matches!(result, Err(StoreError::ConfigurationError(_))));
    }

    #[test]
    fn test_from_toml_file_missing() {
        let result = from_toml_file("/definitely/not/here/store.toml");
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to read TOML file"));
    }

    // ── JSON loading ────────────────────────────────────────────────

    #[test]
    fn test_from_json_str_basic() {
        let json = r#"{"database": ":memory:", "foreign_keys": false}"#;
        let settings = from_json_str(json).unwrap();
        assert!(settings.is_memory());
        assert!(!settings.foreign_keys);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn test_from_json_str_malformed() {
        let result = from_json_str("{not json");
        assert!(matches!(result, Err(StoreError::ConfigurationError(_))));
    }

    // ── Helpers ─────────────────────────────────────────────────────

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(parse_bool("yes"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("off"));
    }

    #[test]
    fn test_merge_json_nested() {
        let base = serde_json::json!({"a": {"b": 1, "c": 2}, "d": 3});
        let over = serde_json::json!({"a": {"c": 20}});
        let merged = merge_json(base, over);
        assert_eq!(merged, serde_json::json!({"a": {"b": 1, "c": 20}, "d": 3}));
    }

    #[test]
    fn test_toml_to_json_array() {
        let value: toml::Value = toml::from_str("x = [1, 2]").unwrap();
        let json = toml_to_json(value);
        assert_eq!(json, serde_json::json!({"x": [1, 2]}));
    }
}

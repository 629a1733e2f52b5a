//! Logging integration for schemata.
//!
//! Provides helpers for configuring [`tracing`]-based logging from
//! [`Settings`](crate::settings::Settings) and for creating per-store spans.

use crate::settings::Settings;

/// Sets up the global tracing subscriber based on the given settings.
///
/// The log level is read from `settings.log_level` (e.g. "debug", "info", "warn",
/// "error"). In debug mode a pretty, human-readable format is used; otherwise
/// a structured JSON format is used.
///
/// Installing a subscriber twice is not an error; the second call is ignored.
pub fn setup_logging(settings: &Settings) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&settings.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.debug {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(true)
            .with_line_number(true)
            .pretty()
            .try_init()
            .ok();
    } else {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .try_init()
            .ok();
    }
}

/// Creates a tracing span for lifecycle work on one store.
///
/// # Examples
///
/// ```
/// use schemata_core::logging::store_span;
///
/// let span = store_span("app.sqlite3", 3);
/// let _guard = span.enter();
/// tracing::info!("upgrading");
/// ```
pub fn store_span(identifier: &str, target_version: u32) -> tracing::Span {
    tracing::info_span!("store", db = identifier, target_version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_twice_is_harmless() {
        let settings = Settings::default();
        setup_logging(&settings);
        setup_logging(&settings);
    }

    #[test]
    fn test_store_span_enter() {
        let span = store_span(":memory:", 1);
        let _guard = span.enter();
        tracing::debug!("inside store span");
    }
}

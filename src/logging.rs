//! Tracing bootstrap.
//!
//! Installs a `tracing-subscriber` fmt layer filtered by `RUST_LOG` when it is
//! set, or by the configured level otherwise. Safe to call more than once; only
//! the first call installs a subscriber.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber at `level` (e.g. "info", "lab_assistant=debug").
///
/// Returns `false` when a subscriber was already installed.
pub fn init(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Like [`init`], but emit one JSON object per event.
pub fn init_json(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}

/// Install the subscriber described by `settings.application`.
pub fn init_from_settings(settings: &crate::config::Settings) -> bool {
    let app = &settings.application;
    match app.log_format.as_str() {
        "json" => init_json(&app.log_level),
        _ => init(&app.log_level),
    }
}

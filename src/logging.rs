//! Logging setup
//!
//! Everything in the crate logs through `tracing`. Hosts opt in to a
//! subscriber with [`init_logging`]; on Android the messages also go to
//! logcat through `android_logger`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub enabled: bool,
    /// One of trace, debug, info, warn, error; anything else means info
    pub level: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            level: None,
        }
    }
}

pub fn parse_log_level(level: Option<&str>) -> tracing::Level {
    match level.map(|l| l.trim().to_ascii_lowercase()).as_deref() {
        Some("trace") => tracing::Level::TRACE,
        Some("debug") => tracing::Level::DEBUG,
        Some("info") => tracing::Level::INFO,
        Some("warn") => tracing::Level::WARN,
        Some("error") => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

#[cfg(feature = "android")]
fn log_filter(level: tracing::Level) -> log::LevelFilter {
    match level {
        tracing::Level::TRACE => log::LevelFilter::Trace,
        tracing::Level::DEBUG => log::LevelFilter::Debug,
        tracing::Level::INFO => log::LevelFilter::Info,
        tracing::Level::WARN => log::LevelFilter::Warn,
        tracing::Level::ERROR => log::LevelFilter::Error,
    }
}

/// Install the global subscriber. Safe to call more than once.
pub fn init_logging(settings: &LogSettings) {
    if !settings.enabled {
        return;
    }
    let level = parse_log_level(settings.level.as_deref());

    #[cfg(feature = "android")]
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log_filter(level))
            .with_tag("ble-common"),
    );

    if tracing_subscriber::fmt().with_max_level(level).try_init().is_ok() {
        tracing::debug!("Logging initialized at {}", level);
    }
}

//! Structured logging for the pewpew relay.
//!
//! Installs a `tracing` subscriber with a console layer (uptime timestamps,
//! targets, levels) and, when configured, a JSON file layer for later
//! analysis. `RUST_LOG` wins over the configured level. Records emitted
//! through the `log` crate are forwarded to the same subscriber.

use std::path::{Path, PathBuf};

use pewpew_config::LogConfig;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use tracing_subscriber::util::TryInitError;

/// Name of the JSON log file inside [`LogConfig::json_dir`].
pub const LOG_FILE: &str = "pewpew.log";

/// Filter used when neither `RUST_LOG` nor the config names one.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber.
///
/// Fails only if a global subscriber is already set. A JSON directory that
/// cannot be created or written is reported as a warning and skipped.
///
/// ```no_run
/// use pewpew_config::LogConfig;
///
/// pewpew_log::init_logging(&LogConfig::default()).expect("logging already set up");
/// ```
pub fn init_logging(config: &LogConfig) -> Result<(), TryInitError> {
    let env_filter = env_filter(config, std::env::var("RUST_LOG").ok().as_deref());

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    let Some(dir) = &config.json_dir else {
        return subscriber.try_init();
    };

    match open_log_file(dir) {
        Ok(log_file) => {
            let file_layer = fmt::layer()
                .with_writer(log_file)
                .with_ansi(false)
                .with_target(true)
                .with_timer(fmt::time::uptime())
                .json();
            subscriber.with(file_layer).try_init()?;
            tracing::info!("Writing JSON logs to {}", log_file_path(dir).display());
        }
        Err(e) => {
            subscriber.try_init()?;
            tracing::warn!("JSON logging disabled, cannot open {}: {e}", dir.display());
        }
    }
    Ok(())
}

/// Build the filter: `rust_log` if it parses, else the configured level,
/// else [`DEFAULT_FILTER`].
pub fn env_filter(config: &LogConfig, rust_log: Option<&str>) -> EnvFilter {
    if let Some(directives) = rust_log
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return filter;
    }
    let level = config.level.trim();
    if level.is_empty() {
        return default_env_filter();
    }
    EnvFilter::try_new(level).unwrap_or_else(|_| default_env_filter())
}

/// `info` for everything.
pub fn default_env_filter() -> EnvFilter {
    EnvFilter::new(DEFAULT_FILTER)
}

/// Where the JSON layer writes inside `dir`.
pub fn log_file_path(dir: &Path) -> PathBuf {
    dir.join(LOG_FILE)
}

fn open_log_file(dir: &Path) -> std::io::Result<std::fs::File> {
    std::fs::create_dir_all(dir)?;
    std::fs::File::create(log_file_path(dir))
}

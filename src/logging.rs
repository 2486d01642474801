//! tracing subscriber setup
//!
//! RUST_LOG wins when set; otherwise `logging.level` applies to the whole
//! process. `logging.format = "json"` switches the console to one json
//! object per line. With `logging.file_log` every event is also appended as
//! json to the log file, whatever the console format.

use crate::config::LoggingConfig;

use anyhow::{anyhow, Context};
use std::fs::{self, File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

fn filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// open `path` for appending, creating its directory first
pub fn open_log_file(path: &Path) -> anyhow::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log dir {}", dir.display()))?;
    }
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))
}

fn build(config: &LoggingConfig, file: Option<File>) -> impl tracing::Subscriber + Send + Sync + 'static {
    let json = config.format == "json";
    let console_json = json.then(|| fmt::layer().json().with_current_span(false));
    let console_compact = (!json).then(|| fmt::layer().compact());
    let file_layer = file.map(|f| {
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_ansi(false)
            .with_writer(Mutex::new(f))
    });

    tracing_subscriber::registry()
        .with(filter(config))
        .with(console_json)
        .with(console_compact)
        .with(file_layer)
}

/// install the global subscriber. a log file that cannot be opened only
/// costs the file copy; the console still works.
pub fn init(config: &LoggingConfig, log_file: Option<&Path>) -> anyhow::Result<()> {
    let (file, file_error) = match log_file.map(open_log_file) {
        Some(Ok(file)) => (Some(file), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    build(config, file)
        .try_init()
        .map_err(|e| anyhow!("failed to install log subscriber: {}", e))?;

    if let Some(e) = file_error {
        warn!(error = ?e, "file logging disabled");
    }
    Ok(())
}

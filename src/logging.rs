//! Log output for the command-line tool.
//!
//! Every run writes a timestamped file under the log directory
//! (`logs/organizer_20240131_142233.log`). The console only shows warnings and
//! errors unless verbose output is requested, since the regular CLI output
//! already reports each file. `RUST_LOG` overrides the configured level.

use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

/// How logging should be set up.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Filter for the log file, e.g. `info` or `casesort=debug`.
    pub level: String,
    /// Mirror the full log to the console.
    pub verbose: bool,
    /// Directory for log files; `None` disables the file.
    pub log_dir: Option<PathBuf>,
}

/// Name of the log file for a run started at `started`.
pub fn log_file_name(started: DateTime<Local>) -> String {
    format!("organizer_{}.log", started.format("%Y%m%d_%H%M%S"))
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber. Returns the log file path, if any.
///
/// Installing twice is harmless; the second call keeps the first subscriber.
pub fn init(config: &LogConfig) -> io::Result<Option<PathBuf>> {
    let console_filter = if config.verbose {
        env_filter(&config.level)
    } else {
        EnvFilter::new("warn")
    };
    let console = fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let (file_layer, log_path) = match &config.log_dir {
        Some(dir) => {
            fs::create_dir_all(dir)?;
            let path = dir.join(log_file_name(Local::now()));
            let file = File::create(&path)?;
            let layer = fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_target(false)
                .with_filter(env_filter(&config.level));
            (Some(layer), Some(path))
        }
        None => (None, None),
    };

    let _ = tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .try_init();
    Ok(log_path)
}

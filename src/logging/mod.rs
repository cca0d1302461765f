//! Diagnostic logging setup.
//!
//! Installs a `tracing` fmt subscriber. By default it writes to stderr; when
//! a log directory is configured, output goes to a daily file named
//! `teamer_<date>.log` in that directory (default: none).

use crate::config::LoggingConfig;
use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::filter::LevelFilter;

/// Install the global subscriber. Fails if one is already installed.
pub fn init(config: &LoggingConfig) -> Result<()> {
    let level = parse_level(&config.level)?;

    match &config.log_dir {
        Some(dir) => {
            let dir = expand_home(dir);
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let path = dir.join(log_file_name(chrono::Local::now().date_naive()));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;

            tracing_subscriber::fmt()
                .with_max_level(level)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .map_err(|e| anyhow!("Failed to install logger: {}", e))
        }
        None => tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| anyhow!("Failed to install logger: {}", e)),
    }
}

fn parse_level(level: &str) -> Result<LevelFilter> {
    level
        .trim()
        .parse()
        .with_context(|| format!("Unknown log level {:?}", level))
}

fn log_file_name(date: NaiveDate) -> String {
    format!("teamer_{}.log", date.format("%Y-%m-%d"))
}

/// Expand a leading `~/` to the home directory.
fn expand_home(dir: &str) -> PathBuf {
    match dir.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(dir),
        },
        None => PathBuf::from(dir),
    }
}

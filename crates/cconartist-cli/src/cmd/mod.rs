//! Subcommand implementations.

pub mod config;
pub mod graph;
pub mod mappings;
pub mod serve;
pub mod streams;

use anyhow::{Context, Result};
use cconartist_core::config_path;
use cconartist_schema::Config;
use std::path::{Path, PathBuf};

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<(PathBuf, Config)> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    let config =
        Config::load(&path).with_context(|| format!("Failed to load config {}", path.display()))?;
    Ok((path, config))
}

/// `YYYY-MM-DD HH:MM:SS` in UTC.
pub fn format_time(secs: u64) -> String {
    i64::try_from(secs)
        .ok()
        .and_then(|s| chrono::DateTime::from_timestamp(s, 0))
        .map_or_else(|| secs.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

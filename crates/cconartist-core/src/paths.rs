use dirs::home_dir;
use std::path::{Path, PathBuf};

/// Returns the cconartist home directory, or None if the user's home cannot be resolved.
pub fn try_cconartist_home() -> Option<PathBuf> {
    if let Ok(val) = std::env::var("CCONARTIST_HOME") {
        return Some(PathBuf::from(val));
    }
    home_dir().map(|h| h.join(".cconartist"))
}

/// Returns the cconartist home directory (`~/.cconartist`), or
/// `.cconartist` in the working directory when no home can be resolved.
pub fn cconartist_home() -> PathBuf {
    try_cconartist_home().unwrap_or_else(|| PathBuf::from(".cconartist"))
}

/// Default configuration: ./config.json if present, else ~/.cconartist/config.json
pub fn config_path() -> PathBuf {
    let local = Path::new("config.json");
    if local.is_file() {
        return local.to_path_buf();
    }
    cconartist_home().join("config.json")
}

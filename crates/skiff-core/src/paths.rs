//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::{Path, PathBuf};

pub const CONFIG_DIR_NAME: &str = ".skiff";
pub const SETTINGS_FILE_NAME: &str = "settings.toml";

/// Get the skiff config directory (~/.skiff)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

/// Get the logs directory (~/.skiff/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join("logs")
}

/// User-level settings (~/.skiff/settings.toml)
pub fn user_settings_file() -> PathBuf {
    config_dir().join(SETTINGS_FILE_NAME)
}

/// User-level commands (~/.skiff/commands)
pub fn user_commands_dir() -> PathBuf {
    config_dir().join("commands")
}

/// Project-level config directory (<cwd>/.skiff)
pub fn project_dir(cwd: &Path) -> PathBuf {
    cwd.join(CONFIG_DIR_NAME)
}

pub fn project_settings_file(cwd: &Path) -> PathBuf {
    project_dir(cwd).join(SETTINGS_FILE_NAME)
}

pub fn project_commands_dir(cwd: &Path) -> PathBuf {
    project_dir(cwd).join("commands")
}

/// Ensure the logs directory exists, creating it if necessary
pub fn ensure_logs_dir() -> std::io::Result<PathBuf> {
    let dir = logs_dir();
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

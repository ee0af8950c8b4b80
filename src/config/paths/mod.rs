//! Platform directories for config and state files.

use crate::error::CacheError;
use directories::ProjectDirs;
use std::path::PathBuf;

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "canopy", "canopy")
}

/// Global config file: `<config dir>/canopy/config.toml`
///
/// `None` when the platform has no resolvable home directory.
pub fn global_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Directory for runtime state such as the default log file.
///
/// Falls back to the data directory on platforms without a state directory.
pub fn state_dir() -> Result<PathBuf, CacheError> {
    let dirs = project_dirs().ok_or_else(|| {
        CacheError::Config("Could not determine platform directories (HOME not set)".to_string())
    })?;
    Ok(dirs
        .state_dir()
        .map(|dir| dir.to_path_buf())
        .unwrap_or_else(|| dirs.data_local_dir().to_path_buf()))
}

// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{RawServerConfig, ServerConfig};
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw
/// `RawServerConfig`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawServerConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawServerConfig = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// Relative `[storage].path` and `[stacks].dir` are resolved against the
/// directory containing the config file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ServerConfig> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let mut config = ServerConfig::try_from(raw_config)?;
    config.resolve_paths(&config_root_dir(path));
    Ok(config)
}

/// `Shepherd.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Shepherd.toml")
}

/// Directory relative paths in the config are resolved against.
///
/// - If the config path has a non-empty parent (e.g. "conf/Shepherd.toml"),
///   we use that directory.
/// - If it's just a bare filename like "Shepherd.toml" (parent = ""),
///   we fall back to the current working directory "."
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

//! Data directory and configuration resolution for the CLI
//!
//! Config comes from an optional YAML file, then environment variables
//! (including a `.env` file), then the `--data-dir` flag.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use thesisfmt_core::config::StorageConfig;
use thesisfmt_core::FormatterConfig;
use tracing::debug;

/// Base directory for templates, jobs and outputs
pub fn default_data_dir() -> Result<PathBuf> {
    #[cfg(windows)]
    {
        let base = dirs::data_local_dir()
            .ok_or_else(|| anyhow!("Could not determine local data directory"))?;
        Ok(base.join("thesisfmt"))
    }

    #[cfg(not(windows))]
    {
        // ~/.local/share/thesisfmt on macOS and Linux alike
        let home = dirs::home_dir().ok_or_else(|| anyhow!("Could not determine home directory"))?;
        Ok(home.join(".local").join("share").join("thesisfmt"))
    }
}

/// Resolve the effective configuration for one invocation
pub fn load_config(config_path: Option<&str>, data_dir: Option<&Path>) -> Result<FormatterConfig> {
    // A missing .env is normal
    if let Ok(path) = dotenvy::dotenv() {
        debug!(path = %path.display(), "loaded .env");
    }

    let mut config = FormatterConfig::load_with_fallback(config_path).apply_env_overrides();

    match data_dir {
        Some(dir) => config.storage.data_dir = dir.to_path_buf(),
        None if config.storage.data_dir == StorageConfig::default().data_dir => {
            config.storage.data_dir = default_data_dir()?;
        }
        None => {}
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_data_dir_is_named_for_the_tool() {
        let dir = default_data_dir().unwrap();
        assert!(dir.ends_with("thesisfmt"));
    }

    #[test]
    fn test_flag_wins() {
        let config = load_config(None, Some(Path::new("/tmp/thesisfmt-flag"))).unwrap();
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/thesisfmt-flag"));
    }
}

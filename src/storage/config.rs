//! TOML Configuration Management
//!
//! Handles reading the server configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::models::settings::AppConfig;
use crate::utils::error::{AppError, AppResult};

/// Configuration service for server settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: Option<PathBuf>,
    config: AppConfig,
}

impl ConfigService {
    /// Load the configuration at `path`. A missing file, or no path at all,
    /// yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let config = match path {
            Some(p) if p.exists() => Self::load_from_file(p)?,
            Some(p) => {
                warn!("[Config] {} not found, using defaults", p.display());
                AppConfig::default()
            }
            None => AppConfig::default(),
        };

        Ok(Self {
            config_path: path.map(Path::to_path_buf),
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<AppConfig> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate().map_err(AppError::validation)?;
        info!(
            "[Config] loaded {} ({} backend(s))",
            path.display(),
            config.backends.len()
        );
        Ok(config)
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn into_config(self) -> AppConfig {
        self.config
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> AppResult<()> {
        let path = self
            .config_path
            .as_deref()
            .ok_or_else(|| AppError::config("no configuration file to reload"))?;
        self.config = Self::load_from_file(path)?;
        Ok(())
    }
}

//! Application paths for config and persisted state.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Application paths.
#[derive(Debug, Clone)]
pub struct AppPaths {
    /// Configuration directory.
    pub config: PathBuf,
    /// Data directory holding the persisted documents.
    pub data: PathBuf,
}

impl AppPaths {
    /// Create paths for the pvcast application.
    #[must_use]
    pub fn new() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("com", "pvcast", "pvcast") {
            Self {
                config: proj_dirs.config_dir().to_path_buf(),
                data: proj_dirs.data_dir().to_path_buf(),
            }
        } else {
            // Fallback to home directory
            let home = directories::BaseDirs::new()
                .map_or_else(|| PathBuf::from("."), |d| d.home_dir().to_path_buf());
            Self {
                config: home.join(".config/pvcast"),
                data: home.join(".local/share/pvcast"),
            }
        }
    }

    /// Paths rooted at an explicit data directory, config stays in the default place.
    #[must_use]
    pub fn with_data_dir(data: impl AsRef<Path>) -> Self {
        Self {
            data: data.as_ref().to_path_buf(),
            ..Self::new()
        }
    }

    /// Path to the config file.
    #[must_use]
    pub fn config_file(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    /// Path to the forecast and site cache.
    #[must_use]
    pub fn forecasts_file(&self) -> PathBuf {
        self.data.join("forecasts.json")
    }

    /// Path to the API usage document.
    #[must_use]
    pub fn usage_file(&self) -> PathBuf {
        self.data.join("usage.json")
    }

    /// Path to the dampening profiles document.
    #[must_use]
    pub fn dampening_file(&self) -> PathBuf {
        self.data.join("dampening.json")
    }

    /// Ensure all directories exist.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config)?;
        std::fs::create_dir_all(&self.data)?;
        Ok(())
    }
}

impl Default for AppPaths {
    fn default() -> Self {
        Self::new()
    }
}

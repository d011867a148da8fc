//! Runtime configuration.

use std::path::PathBuf;

/// Where addons live and which files count as addon archives.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Directory scanned for addon archives (default: `addons`).
    pub addon_dir: PathBuf,
    /// Parent of every addon's data folder (default: the addon directory).
    pub data_dir: PathBuf,
    /// Archive file extensions, without the dot (default: `jar`, `zip`).
    pub archive_extensions: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            addon_dir: PathBuf::from("addons"),
            data_dir: PathBuf::from("addons"),
            archive_extensions: vec!["jar".to_string(), "zip".to_string()],
        }
    }
}

impl RuntimeConfig {
    /// Config rooted at a specific addon directory, other fields defaulted.
    pub fn with_addon_dir(addon_dir: impl Into<PathBuf>) -> Self {
        let addon_dir = addon_dir.into();
        Self {
            data_dir: addon_dir.clone(),
            addon_dir,
            ..Self::default()
        }
    }

    /// Build config from environment variables.
    pub fn from_env() -> Self {
        let addon_dir = std::env::var("ADDON_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("addons"));
        let data_dir = std::env::var("ADDON_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| addon_dir.clone());
        let archive_extensions = std::env::var("ADDON_ARCHIVE_EXTENSIONS")
            .ok()
            .map(|v| parse_extensions(&v))
            .filter(|exts| !exts.is_empty())
            .unwrap_or_else(|| Self::default().archive_extensions);

        Self {
            addon_dir,
            data_dir,
            archive_extensions,
        }
    }

    /// Data folder of a named addon.
    pub fn data_folder(&self, addon: &str) -> PathBuf {
        self.data_dir.join(addon)
    }
}

fn parse_extensions(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

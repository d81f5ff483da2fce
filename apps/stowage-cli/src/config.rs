//! CLI configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/stowage/stowage.toml`
//! - Windows: `%APPDATA%/stowage/stowage.toml`

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use stowage_archive::ArchiveFormat;

/// What to do when the destination already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CollisionPolicy {
    #[default]
    Ask,
    Overwrite,
    Cancel,
}

/// What to do when a file cannot be archived.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    #[default]
    Ask,
    Skip,
    Cancel,
}

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Archive format used when the destination name does not tell.
    #[serde(default)]
    pub format: ArchiveFormat,

    /// Progress refresh interval in milliseconds.
    #[serde(default = "default_progress_interval_ms")]
    pub progress_interval_ms: u64,

    /// Bytes per second (0 = unlimited).
    #[serde(default)]
    pub throughput_limit: u64,

    /// Copy buffer size in bytes.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Comment stored in archives that support one.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub comment: String,

    #[serde(default)]
    pub on_collision: CollisionPolicy,

    #[serde(default)]
    pub on_error: ErrorPolicy,
}

fn default_progress_interval_ms() -> u64 {
    500
}

fn default_buffer_size() -> usize {
    stowage_transfer::DEFAULT_BUFFER_SIZE
}

impl Default for Config {
    fn default() -> Self {
        Self {
            format: ArchiveFormat::default(),
            progress_interval_ms: default_progress_interval_ms(),
            throughput_limit: 0,
            buffer_size: default_buffer_size(),
            comment: String::new(),
            on_collision: CollisionPolicy::default(),
            on_error: ErrorPolicy::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the default location, creating it if missing.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, creating a default file if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("stowage")
            .join("stowage.toml"))
    }

    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("stowage").join("stowage.toml"))
    }

    #[cfg(not(any(target_os = "linux", target_os = "windows")))]
    {
        Ok(PathBuf::from("/tmp/stowage/stowage.toml"))
    }
}

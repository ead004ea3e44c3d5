//! Configuration loading and root folder resolution
//!
//! Bootstrap configuration only. Two concerns live here:
//! - [`TomlConfig`]: bind address, port, database file name, logging level
//! - [`RootFolderResolver`]: where the database lives, resolved in priority order:
//!   1. Command-line argument (highest priority)
//!   2. Environment variable (`CARDTRACK_ROOT_FOLDER`, then `CARDTRACK_ROOT`)
//!   3. TOML config file `root_folder` key
//!   4. OS-dependent compiled default (fallback)
//!
//! A missing TOML file never stops startup; defaults are used instead.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

/// Primary root folder environment variable
pub const ROOT_FOLDER_ENV: &str = "CARDTRACK_ROOT_FOLDER";

/// Alternative root folder environment variable
pub const ROOT_ENV: &str = "CARDTRACK_ROOT";

/// Bootstrap configuration loaded from TOML file
#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    /// Interface the HTTP server binds to
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// SQLite file name, relative to the root folder
    #[serde(default = "default_database_file")]
    pub database_file: String,

    /// Root folder holding the database (optional)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Logging configuration (optional)
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            database_file: default_database_file(),
            root_folder: None,
            logging: LoggingConfig::default(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5730
}

fn default_database_file() -> String {
    "cardtrack.db".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Where a loaded [`TomlConfig`] came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load bootstrap configuration
    ///
    /// An explicitly requested file must exist and parse. Without one, the
    /// platform locations are searched and compiled defaults are used when
    /// nothing is found. The caller logs the returned source.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let path = match explicit {
            Some(path) => {
                if !path.exists() {
                    return Err(Error::Config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                path.to_path_buf()
            }
            None => match find_config_file() {
                Some(path) => path,
                None => return Ok((Self::default(), ConfigSource::Defaults)),
            },
        };

        let content = std::fs::read_to_string(&path)?;
        let config = Self::from_toml_str(&content)?;
        Ok((config, ConfigSource::File(path)))
    }
}

/// Locate the configuration file for the platform, if one exists
fn find_config_file() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("cardtrack").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/cardtrack/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }

    None
}

/// Get OS-dependent default root folder path
pub fn default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        dirs::data_local_dir()
            .map(|d| d.join("cardtrack"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/cardtrack"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("cardtrack"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/cardtrack"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("cardtrack"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\cardtrack"))
    } else {
        PathBuf::from("./cardtrack_data")
    }
}

/// Root folder resolution following the documented priority order
#[derive(Debug, Clone)]
pub struct RootFolderResolver {
    module_name: String,
    cli_arg: Option<PathBuf>,
    toml_root: Option<PathBuf>,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
            cli_arg: None,
            toml_root: None,
        }
    }

    /// Command-line override (priority 1)
    pub fn with_cli_arg(mut self, path: Option<PathBuf>) -> Self {
        self.cli_arg = path;
        self
    }

    /// TOML `root_folder` value (priority 3)
    pub fn with_toml_root(mut self, path: Option<PathBuf>) -> Self {
        self.toml_root = path;
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = &self.cli_arg {
            info!("{}: root folder from command line", self.module_name);
            return path.clone();
        }

        for var in [ROOT_FOLDER_ENV, ROOT_ENV] {
            if let Ok(path) = std::env::var(var) {
                if !path.is_empty() {
                    info!("{}: root folder from {}", self.module_name, var);
                    return PathBuf::from(path);
                }
            }
        }

        if let Some(path) = &self.toml_root {
            info!("{}: root folder from config file", self.module_name);
            return path.clone();
        }

        default_root_folder()
    }
}

/// Prepares the resolved root folder for use
#[derive(Debug, Clone)]
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder if missing (idempotent)
    pub fn ensure_directory_exists(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        Ok(())
    }

    pub fn database_path(&self, database_file: &str) -> PathBuf {
        self.root_folder.join(database_file)
    }

    pub fn database_exists(&self, database_file: &str) -> bool {
        self.database_path(database_file).exists()
    }
}

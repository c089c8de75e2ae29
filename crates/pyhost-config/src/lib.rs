//! Staged configuration for the embedded interpreter
//!
//! `InterpreterConfig` holds the values the runtime hands to the interpreter at
//! its next start: home directory, program name and an explicit module search
//! path. Setters only stage values; nothing here touches a running
//! interpreter. Configuration may also be persisted as TOML.

pub mod search_path;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use search_path::{join_search_path, split_search_path, SEARCH_PATH_SEPARATOR};

/// Environment variable providing the default interpreter home
pub const HOME_ENV_VAR: &str = "PYTHONHOME";

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "PYHOST_CONFIG";

/// Program name the interpreter reports when none is staged
#[cfg(windows)]
pub const DEFAULT_PROGRAM_NAME: &str = "python";
#[cfg(not(windows))]
pub const DEFAULT_PROGRAM_NAME: &str = "python3";

/// Errors that can occur while loading or saving configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Could not determine the user config directory")]
    NoConfigDir,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct InterpreterConfig {
    #[serde(rename = "home", skip_serializing_if = "Option::is_none")]
    home_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    program_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    search_path: Option<Vec<String>>,
}

impl InterpreterConfig {
    /// Home directory the interpreter will start with
    ///
    /// Falls back to `PYTHONHOME`, then to an empty string.
    pub fn home_path(&self) -> String {
        resolve_home(
            self.home_path.as_deref(),
            std::env::var(HOME_ENV_VAR).ok().as_deref(),
        )
    }

    /// Explicitly staged home, if any
    pub fn staged_home_path(&self) -> Option<&str> {
        self.home_path.as_deref()
    }

    /// Stage a home directory. The value is not validated.
    pub fn set_home_path(&mut self, home: impl Into<String>) {
        self.home_path = Some(home.into());
    }

    /// Drop the staged home so the environment default applies again
    pub fn clear_home_path(&mut self) {
        self.home_path = None;
    }

    pub fn program_name(&self) -> String {
        self.program_name
            .clone()
            .unwrap_or_else(|| DEFAULT_PROGRAM_NAME.to_string())
    }

    pub fn staged_program_name(&self) -> Option<&str> {
        self.program_name.as_deref()
    }

    pub fn set_program_name(&mut self, name: impl Into<String>) {
        self.program_name = Some(name.into());
    }

    /// Explicitly staged search path joined with [`SEARCH_PATH_SEPARATOR`],
    /// or an empty string when none was staged
    pub fn search_path(&self) -> String {
        self.search_path
            .as_deref()
            .map(join_search_path)
            .unwrap_or_default()
    }

    pub fn search_path_entries(&self) -> Option<&[String]> {
        self.search_path.as_deref()
    }

    /// Stage a separator-joined search path
    pub fn set_search_path(&mut self, joined: &str) {
        self.search_path = Some(split_search_path(joined));
    }

    pub fn set_search_path_entries(&mut self, entries: Vec<String>) {
        self.search_path = Some(entries);
    }

    /// Location of the config file
    ///
    /// `PYHOST_CONFIG` wins when set and non-empty, otherwise
    /// `<config dir>/pyhost/pyhost.toml`.
    pub fn path() -> Result<PathBuf, ConfigError> {
        if let Ok(env_path) = std::env::var(CONFIG_ENV_VAR) {
            let trimmed = env_path.trim();
            if !trimmed.is_empty() {
                return Ok(PathBuf::from(trimmed));
            }
        }

        #[cfg(not(target_os = "windows"))]
        let base = dirs::home_dir()
            .ok_or(ConfigError::NoConfigDir)?
            .join(".config");

        #[cfg(target_os = "windows")]
        let base = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;

        Ok(base.join("pyhost").join("pyhost.toml"))
    }

    /// Load from the default location; a missing file yields the default config
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }
}

fn resolve_home(staged: Option<&str>, env_home: Option<&str>) -> String {
    staged.or(env_home).unwrap_or_default().to_string()
}

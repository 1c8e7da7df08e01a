//! Tool settings read from a TOML file.
//!
//! Separate from the connection record: these never affect the database
//! itself, only where resources come from and how services are restarted.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::config::Environment;

/// Where resources are downloaded from when none is configured.
pub const DEFAULT_BASE_URL: &str =
    "https://raw.githubusercontent.com/flox/floxenvs/main/postgres-metabase";
/// Command used to restart the supervised server after `configure`.
pub const DEFAULT_RESTART_COMMAND: &str = "flox services restart postgres";
/// Settings file name inside the project's `.flox` directory.
pub const PROJECT_SETTINGS_FILE: &str = "pgstack.toml";

/// Parsed settings, defaults filled in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// `[resources]`
    pub resources: ResourcesSection,
    /// `[loader]`
    pub loader: LoaderSection,
    /// `[services]`
    pub services: ServicesSection,
    #[serde(skip)]
    path: Option<PathBuf>,
}

/// Where the fetcher downloads missing resources from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResourcesSection {
    /// Base URL; file paths are appended after a `/`.
    pub base_url: String,
}

impl Default for ResourcesSection {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

/// Loader defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoaderSection {
    /// CSV used when neither `--csv` nor `IOWA_LIQUOR_CSV` is given.
    pub csv_path: Option<PathBuf>,
}

/// Service supervisor integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServicesSection {
    /// Shell command run after reconfiguration; empty disables it.
    pub restart_command: String,
}

impl Default for ServicesSection {
    fn default() -> Self {
        Self {
            restart_command: DEFAULT_RESTART_COMMAND.to_string(),
        }
    }
}

impl Settings {
    /// Loads from `explicit`, else the project file, else the user config
    /// directory. A missing file yields defaults; an explicit path must exist.
    pub fn load(explicit: Option<&Path>, env: &Environment) -> Result<Self, SettingsError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(SettingsError::NotFound(path.to_path_buf()));
            }
            return read_file(path);
        }
        for candidate in default_locations(env) {
            if candidate.exists() {
                return read_file(&candidate);
            }
        }
        debug!("no settings file found, using defaults");
        Ok(Self::default())
    }

    /// File the settings came from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.resources.base_url.trim_end_matches('/')
    }

    /// Restart command, `None` when disabled.
    pub fn restart_command(&self) -> Option<&str> {
        let command = self.services.restart_command.trim();
        (!command.is_empty()).then_some(command)
    }
}

/// Candidate settings files, most specific first.
pub fn default_locations(env: &Environment) -> Vec<PathBuf> {
    let mut locations = vec![env.project_root().join(".flox").join(PROJECT_SETTINGS_FILE)];
    if let Some(base) = dirs::config_dir() {
        locations.push(base.join("pgstack").join("settings.toml"));
    }
    locations
}

fn read_file(path: &Path) -> Result<Settings, SettingsError> {
    let contents = fs::read_to_string(path).map_err(|source| SettingsError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut settings: Settings = toml::from_str(&contents).map_err(|source| SettingsError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    settings.path = Some(path.to_path_buf());
    debug!(path = %path.display(), "loaded settings");
    Ok(settings)
}

/// Settings file problems.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// `--settings` points nowhere.
    #[error("settings file {0} does not exist")]
    NotFound(PathBuf),
    /// Unreadable file.
    #[error("failed to read settings {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Invalid TOML or unknown keys.
    #[error("failed to parse settings {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Parser error.
        source: toml::de::Error,
    },
}

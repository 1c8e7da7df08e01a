//! Connection configuration for the local PostgreSQL instance.
//!
//! A [`ConnectionConfig`] is the single record every other component reads:
//! it is produced once per invocation by the [`Resolver`] (from the persisted
//! file or the wizard) and then passed explicitly to the lifecycle manager,
//! the loader and the shell emitters.

mod paths;
mod resolve;
mod store;

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

pub use paths::DerivedPaths;
pub(crate) use paths::all_variables;
pub use resolve::{ConfigSource, Resolved, Resolver};
pub use store::{parse_config, render_config, ConfigStore};
pub(crate) use store::shell_quote;

/// Default listen address for the server.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default TCP port; chosen to stay clear of a system-wide PostgreSQL on 5432.
pub const DEFAULT_PORT: u16 = 15432;
/// Default superuser created by `initdb`.
pub const DEFAULT_USER: &str = "pguser";
/// Default superuser password.
pub const DEFAULT_PASSWORD: &str = "pgpass";
/// Default database holding the sample dataset.
pub const DEFAULT_DATABASE: &str = "iowa_liquor_sales";

/// Name of the persisted connection record inside `<cache>/pgstack/`.
pub const CONFIG_FILE_NAME: &str = "pgconfig.env";

/// Keys of the persisted connection record, in file order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum ConfigKey {
    /// Listen address (`PGHOSTADDR`).
    HostAddr,
    /// TCP port (`PGPORT`).
    Port,
    /// Superuser name (`PGUSER`).
    User,
    /// Superuser password (`PGPASS`).
    Password,
    /// Target database (`PGDATABASE`).
    Database,
    /// Base directory for data, sockets and logs (`PGDIR`).
    BaseDir,
    /// Verbose logging flag (`PG_DEBUG`).
    Debug,
}

impl ConfigKey {
    /// All keys in the order they are written to disk.
    pub const ALL: [ConfigKey; 7] = [
        ConfigKey::HostAddr,
        ConfigKey::Port,
        ConfigKey::User,
        ConfigKey::Password,
        ConfigKey::Database,
        ConfigKey::BaseDir,
        ConfigKey::Debug,
    ];

    /// Environment variable name for this key.
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigKey::HostAddr => "PGHOSTADDR",
            ConfigKey::Port => "PGPORT",
            ConfigKey::User => "PGUSER",
            ConfigKey::Password => "PGPASS",
            ConfigKey::Database => "PGDATABASE",
            ConfigKey::BaseDir => "PGDIR",
            ConfigKey::Debug => "PG_DEBUG",
        }
    }

    /// Looks a key up by its variable name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process context the resolver works from.
///
/// Captured once at startup so nothing downstream reads ambient process
/// state; tests build one by hand.
#[derive(Debug, Clone)]
pub struct Environment {
    project_root: PathBuf,
    cache_root: PathBuf,
    vars: BTreeMap<String, String>,
}

impl Environment {
    /// Project root variable exported by the Flox environment.
    pub const PROJECT_VAR: &'static str = "FLOX_ENV_PROJECT";
    /// Cache root variable exported by the Flox environment.
    pub const CACHE_VAR: &'static str = "FLOX_ENV_CACHE";

    /// Builds an environment with explicit roots and no variables.
    pub fn new(project_root: impl Into<PathBuf>, cache_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: project_root.into(),
            cache_root: cache_root.into(),
            vars: BTreeMap::new(),
        }
    }

    /// Snapshots the current process environment.
    pub fn from_process() -> io::Result<Self> {
        let vars: BTreeMap<String, String> = env::vars().collect();
        let project_root = match vars.get(Self::PROJECT_VAR).filter(|v| !v.is_empty()) {
            Some(root) => PathBuf::from(root),
            None => env::current_dir()?,
        };
        let cache_root = vars
            .get(Self::CACHE_VAR)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| project_root.join(".flox").join("cache"));
        Ok(Self {
            project_root,
            cache_root,
            vars,
        })
    }

    /// Adds or replaces a variable.
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }

    /// Returns a non-empty variable.
    pub fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Project root directory.
    pub fn project_root(&self) -> &Path {
        &self.project_root
    }

    /// Cache root directory.
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Well-known location of the persisted connection record.
    pub fn config_path(&self) -> PathBuf {
        self.cache_root.join("pgstack").join(CONFIG_FILE_NAME)
    }
}

/// The seven base connection parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionConfig {
    /// Listen address.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Superuser name.
    pub user: String,
    /// Superuser password. Never serialized into reports.
    #[serde(skip_serializing)]
    pub password: String,
    /// Target database name.
    pub database: String,
    /// Base directory for data, sockets and logs.
    pub base_dir: PathBuf,
    /// Verbose logging.
    pub debug: bool,
}

impl ConnectionConfig {
    /// Compile-time defaults rooted at `<cache>/postgres`.
    pub fn defaults(env: &Environment) -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            user: DEFAULT_USER.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            database: DEFAULT_DATABASE.to_string(),
            base_dir: env.cache_root().join("postgres"),
            debug: false,
        }
    }

    /// Paths derived from this record.
    pub fn paths(&self) -> DerivedPaths {
        DerivedPaths::derive(self)
    }

    /// Raw string value for a key, as written to disk.
    pub fn value(&self, key: ConfigKey) -> String {
        match key {
            ConfigKey::HostAddr => self.host.clone(),
            ConfigKey::Port => self.port.to_string(),
            ConfigKey::User => self.user.clone(),
            ConfigKey::Password => self.password.clone(),
            ConfigKey::Database => self.database.clone(),
            ConfigKey::BaseDir => self.base_dir.display().to_string(),
            ConfigKey::Debug => self.debug.to_string(),
        }
    }

    /// Sets one field from its string form.
    pub fn set(&mut self, key: ConfigKey, raw: &str) -> Result<(), ConfigError> {
        match key {
            ConfigKey::HostAddr => self.host = raw.to_string(),
            ConfigKey::Port => self.port = parse_port(raw)?,
            ConfigKey::User => self.user = raw.to_string(),
            ConfigKey::Password => self.password = raw.to_string(),
            ConfigKey::Database => self.database = raw.to_string(),
            ConfigKey::BaseDir => self.base_dir = PathBuf::from(raw),
            ConfigKey::Debug => self.debug = parse_flag(raw)?,
        }
        Ok(())
    }

    /// Applies every config variable present in `env`, returning the keys
    /// that were overridden.
    pub fn apply_env(&mut self, env: &Environment) -> Result<Vec<ConfigKey>, ConfigError> {
        let mut applied = Vec::new();
        for key in ConfigKey::ALL {
            if let Some(value) = env.var(key.as_str()) {
                self.set(key, value)?;
                applied.push(key);
            }
        }
        Ok(applied)
    }
}

pub(crate) fn parse_port(raw: &str) -> Result<u16, ConfigError> {
    match raw.trim().parse::<u16>() {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ConfigError::InvalidValue {
            key: ConfigKey::Port,
            value: raw.to_string(),
        }),
    }
}

pub(crate) fn parse_flag(raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: ConfigKey::Debug,
            value: raw.to_string(),
        }),
    }
}

/// Errors raised while loading, prompting for or saving the connection record.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Parent directory of the config file could not be created.
    #[error("failed to create config directory {path}: {source}")]
    CreateDir {
        /// Directory that could not be created.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Config file exists but could not be read.
    #[error("failed to read config {path}: {source}")]
    Read {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Config file could not be written.
    #[error("failed to write config {path}: {source}")]
    Write {
        /// Config file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// A line is not of the form `KEY=value`.
    #[error("malformed line {line} in config {path}")]
    Malformed {
        /// Config file path.
        path: PathBuf,
        /// One-based line number.
        line: usize,
    },
    /// A required key is absent from the config file.
    #[error("config {path} is missing {key}")]
    MissingKey {
        /// Config file path.
        path: PathBuf,
        /// Missing key.
        key: ConfigKey,
    },
    /// A value does not parse for its key.
    #[error("invalid value '{value}' for {key}")]
    InvalidValue {
        /// Offending key.
        key: ConfigKey,
        /// Raw value.
        value: String,
    },
    /// Reading an answer from the prompter failed.
    #[error("failed to read configuration input: {0}")]
    Prompt(#[source] io::Error),
}

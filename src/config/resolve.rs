use std::path::PathBuf;

use serde::Serialize;
use tracing::{debug, info};

use super::{all_variables, ConfigError, ConfigKey, ConfigStore, ConnectionConfig, DerivedPaths, Environment};
use crate::wizard::{self, Prompter};

/// Where the resolved record came from.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigSource {
    /// No record existed; the wizard produced and persisted one.
    Wizard,
    /// Loaded from the persisted file.
    File,
}

/// Outcome of resolution: the immutable configuration threaded through
/// every later step.
#[derive(Debug, Clone, Serialize)]
pub struct Resolved {
    /// Base parameters.
    pub config: ConnectionConfig,
    /// Paths derived from `config`.
    pub paths: DerivedPaths,
    /// Origin of `config`.
    pub source: ConfigSource,
    /// Location of the persisted record.
    pub config_path: PathBuf,
    /// Keys whose file value was overridden by the environment for this run.
    pub overridden: Vec<String>,
}

impl Resolved {
    fn new(
        config: ConnectionConfig,
        source: ConfigSource,
        config_path: PathBuf,
        overridden: Vec<ConfigKey>,
    ) -> Self {
        let paths = config.paths();
        Self {
            config,
            paths,
            source,
            config_path,
            overridden: overridden.iter().map(|k| k.as_str().to_string()).collect(),
        }
    }

    /// Every base and derived variable, in export order.
    pub fn variables(&self) -> Vec<(&'static str, String)> {
        all_variables(&self.config, &self.paths)
    }
}

/// Decides between loading the persisted record and running the wizard.
pub struct Resolver<'a> {
    env: &'a Environment,
    store: ConfigStore,
}

impl<'a> Resolver<'a> {
    /// Resolver backed by the environment's well-known config path.
    pub fn new(env: &'a Environment) -> Self {
        Self {
            env,
            store: ConfigStore::new(env.config_path()),
        }
    }

    /// Resolver backed by an explicit store.
    pub fn with_store(env: &'a Environment, store: ConfigStore) -> Self {
        Self { env, store }
    }

    /// Backing store.
    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Loads the persisted record, or runs the wizard and persists its answer.
    ///
    /// On the load path, variables already present in the environment win
    /// over the file for this run only; the file is left untouched.
    pub fn resolve<P: Prompter>(&self, prompter: &mut P) -> Result<Resolved, ConfigError> {
        if self.store.exists() {
            let mut config = self.store.load()?;
            let overridden = config.apply_env(self.env)?;
            if !overridden.is_empty() {
                debug!(?overridden, "environment overrides persisted config");
            }
            return Ok(Resolved::new(
                config,
                ConfigSource::File,
                self.store.path().to_path_buf(),
                overridden,
            ));
        }
        info!(path = %self.store.path().display(), "no saved configuration, starting wizard");
        self.reconfigure(prompter)
    }

    /// Runs the wizard unconditionally and overwrites the persisted record.
    pub fn reconfigure<P: Prompter>(&self, prompter: &mut P) -> Result<Resolved, ConfigError> {
        let mut defaults = ConnectionConfig::defaults(self.env);
        defaults.apply_env(self.env)?;
        let config = wizard::run(prompter, &defaults)?;
        self.store.save(&config)?;
        Ok(Resolved::new(
            config,
            ConfigSource::Wizard,
            self.store.path().to_path_buf(),
            Vec::new(),
        ))
    }
}

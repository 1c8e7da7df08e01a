use std::path::PathBuf;

use serde::Serialize;

use super::{ConfigKey, ConnectionConfig};

/// Filesystem locations and URLs computed from a [`ConnectionConfig`].
///
/// Never persisted; recomputed on every activation so a changed `PGDIR`
/// cannot leave stale paths behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DerivedPaths {
    /// Cluster data directory (`PGDATA`).
    pub data_dir: PathBuf,
    /// Unix-socket directory (`PGHOST`).
    pub run_dir: PathBuf,
    /// Server configuration file inside the data directory (`PGCONFIGFILE`).
    pub config_file: PathBuf,
    /// Server log file (`LOG_PATH`).
    pub log_path: PathBuf,
    /// Socket-based connection URL (`DATABASE_URL`).
    pub database_url: String,
}

impl DerivedPaths {
    /// Computes every derived value. Pure: equal inputs give equal outputs.
    pub fn derive(config: &ConnectionConfig) -> Self {
        let data_dir = config.base_dir.join("data");
        let run_dir = config.base_dir.join("run");
        let config_file = data_dir.join("postgresql.conf");
        let log_path = config.base_dir.join("postgres.log");
        let database_url = format!(
            "postgresql:///{}?host={}&port={}",
            config.database,
            run_dir.display(),
            config.port
        );
        Self {
            data_dir,
            run_dir,
            config_file,
            log_path,
            database_url,
        }
    }

    /// Derived variables in export order.
    pub fn variables(&self) -> Vec<(&'static str, String)> {
        vec![
            ("PGDATA", self.data_dir.display().to_string()),
            ("PGHOST", self.run_dir.display().to_string()),
            ("PGCONFIGFILE", self.config_file.display().to_string()),
            ("LOG_PATH", self.log_path.display().to_string()),
            ("DATABASE_URL", self.database_url.clone()),
        ]
    }
}

/// Base and derived variables together, in the order shells receive them.
pub(crate) fn all_variables(
    config: &ConnectionConfig,
    paths: &DerivedPaths,
) -> Vec<(&'static str, String)> {
    let mut vars: Vec<(&'static str, String)> = ConfigKey::ALL
        .into_iter()
        .map(|key| (key.as_str(), config.value(key)))
        .collect();
    vars.extend(paths.variables());
    vars
}

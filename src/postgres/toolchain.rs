use std::path::{Path, PathBuf};

use tracing::debug;

use super::PostgresError;

/// Absolute paths of the PostgreSQL binaries this crate drives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// `initdb`
    pub initdb: PathBuf,
    /// `pg_ctl`
    pub pg_ctl: PathBuf,
    /// `psql`
    pub psql: PathBuf,
    /// `createdb`
    pub createdb: PathBuf,
}

impl Toolchain {
    /// Resolves every binary on `PATH`.
    pub fn discover() -> Result<Self, PostgresError> {
        let tools = Self {
            initdb: find("initdb")?,
            pg_ctl: find("pg_ctl")?,
            psql: find("psql")?,
            createdb: find("createdb")?,
        };
        debug!(?tools, "resolved PostgreSQL toolchain");
        Ok(tools)
    }

    /// Binaries assumed to live in `bin_dir`, without checking.
    pub fn in_dir(bin_dir: impl AsRef<Path>) -> Self {
        let bin_dir = bin_dir.as_ref();
        Self {
            initdb: bin_dir.join("initdb"),
            pg_ctl: bin_dir.join("pg_ctl"),
            psql: bin_dir.join("psql"),
            createdb: bin_dir.join("createdb"),
        }
    }
}

fn find(tool: &'static str) -> Result<PathBuf, PostgresError> {
    which::which(tool).map_err(|source| PostgresError::ToolNotFound { tool, source })
}

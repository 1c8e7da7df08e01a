use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::info;

use super::{CommandRunner, Invocation, PostgresError, Toolchain};
use crate::config::ConnectionConfig;

/// Talks to a running server over its Unix socket via `psql`/`createdb`.
pub struct Client<'a, R: CommandRunner> {
    config: &'a ConnectionConfig,
    run_dir: PathBuf,
    tools: &'a Toolchain,
    runner: &'a R,
}

impl<'a, R: CommandRunner> Client<'a, R> {
    /// Client for the server described by `config`.
    pub fn new(config: &'a ConnectionConfig, tools: &'a Toolchain, runner: &'a R) -> Self {
        Self {
            config,
            run_dir: config.paths().run_dir,
            tools,
            runner,
        }
    }

    /// Connection record this client uses.
    pub fn config(&self) -> &ConnectionConfig {
        self.config
    }

    fn connection_args(&self, database: &str) -> Vec<String> {
        vec![
            "-h".to_string(),
            self.run_dir.display().to_string(),
            "-p".to_string(),
            self.config.port.to_string(),
            "-U".to_string(),
            self.config.user.clone(),
            "-d".to_string(),
            database.to_string(),
        ]
    }

    fn psql(&self, database: &str) -> Invocation {
        Invocation::new(&self.tools.psql)
            .args(self.connection_args(database))
            .args(["-X", "-v", "ON_ERROR_STOP=1"])
            .env("PGPASSWORD", self.config.password.clone())
            .env_remove("PGHOSTADDR")
    }

    /// Runs one statement and returns its rows, unaligned, one per line.
    pub fn query(&self, database: &str, sql: &str) -> Result<Vec<String>, PostgresError> {
        let invocation = self.psql(database).args(["-A", "-t", "-c", sql]);
        let output = self.runner.run_checked(&invocation)?;
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Executes a script file and returns psql's output for display.
    pub fn execute_file(&self, database: &str, script: &Path) -> Result<String, PostgresError> {
        let invocation = self
            .psql(database)
            .arg("-f")
            .arg(script.as_os_str().to_os_string());
        let output = self.runner.run_checked(&invocation)?;
        Ok(output.stdout)
    }

    /// Writes `sql` to a temporary file and executes it in one session.
    pub fn execute_script(&self, database: &str, sql: &str) -> Result<String, PostgresError> {
        let mut script = tempfile::Builder::new()
            .prefix("pgstack-")
            .suffix(".sql")
            .tempfile()
            .map_err(|err| PostgresError::filesystem(std::env::temp_dir(), err))?;
        let written = script.write_all(sql.as_bytes()).and_then(|()| script.flush());
        written.map_err(|err| PostgresError::filesystem(script.path(), err))?;
        self.execute_file(database, script.path())
    }

    /// Names of every database on the server.
    pub fn list_databases(&self) -> Result<Vec<String>, PostgresError> {
        self.query("postgres", "SELECT datname FROM pg_database")
    }

    /// Creates `database` unless it already exists. Returns whether it was created.
    pub fn ensure_database(&self, database: &str) -> Result<bool, PostgresError> {
        if self.list_databases()?.iter().any(|name| name == database) {
            info!(database, "database already exists");
            return Ok(false);
        }
        let invocation = Invocation::new(&self.tools.createdb)
            .args(["-h", &self.run_dir.display().to_string()])
            .args(["-p", &self.config.port.to_string()])
            .args(["-U", &self.config.user])
            .arg(database)
            .env("PGPASSWORD", self.config.password.clone())
            .env_remove("PGHOSTADDR");
        self.runner.run_checked(&invocation)?;
        info!(database, "created database");
        Ok(true)
    }
}

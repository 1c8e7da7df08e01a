use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use super::state::STATE_FILE_NAME;
use super::{
    Client, ClusterState, CommandRunner, Invocation, PostgresError, SetupStep,
    StateRecord, Toolchain,
};
use crate::config::{ConnectionConfig, DerivedPaths};
use crate::error::{Error, Result};

/// File `initdb` leaves in every initialized data directory.
const VERSION_MARKER: &str = "PG_VERSION";

/// Summary of a completed `setup`.
#[derive(Debug, Clone, Serialize)]
pub struct SetupReport {
    /// Data directory that was initialized.
    pub data_dir: PathBuf,
    /// Database that now exists.
    pub database: String,
    /// Whether `createdb` had to run.
    pub database_created: bool,
    /// State after the final stop.
    pub state: ClusterState,
}

/// One PostgreSQL cluster: a data directory plus the binaries that manage it.
pub struct Cluster<'a, R: CommandRunner> {
    config: &'a ConnectionConfig,
    paths: DerivedPaths,
    tools: Toolchain,
    runner: R,
}

impl<'a, R: CommandRunner> Cluster<'a, R> {
    /// Cluster described by `config`.
    pub fn new(config: &'a ConnectionConfig, tools: Toolchain, runner: R) -> Self {
        Self {
            paths: config.paths(),
            config,
            tools,
            runner,
        }
    }

    /// Derived paths in use.
    pub fn paths(&self) -> &DerivedPaths {
        &self.paths
    }

    /// Client bound to this cluster's socket.
    pub fn client(&self) -> Client<'_, R> {
        Client::new(self.config, &self.tools, &self.runner)
    }

    fn state_path(&self) -> PathBuf {
        self.config.base_dir.join(STATE_FILE_NAME)
    }

    fn record(&self, state: ClusterState) -> std::result::Result<(), PostgresError> {
        debug!(%state, "recording cluster state");
        StateRecord::store(&self.state_path(), &self.paths.data_dir, state)
    }

    /// Current state, from the persisted record, the version marker and
    /// `pg_ctl status`.
    pub fn observe(&self) -> std::result::Result<ClusterState, PostgresError> {
        let record = StateRecord::load(&self.state_path())?;
        let recorded = record.as_ref().map(|r| r.state);
        let has_marker = self.paths.data_dir.join(VERSION_MARKER).is_file();

        if recorded == Some(ClusterState::Initializing) {
            warn!(
                data_dir = %self.paths.data_dir.display(),
                "previous initialization did not finish"
            );
            return Ok(ClusterState::Absent);
        }
        if !has_marker {
            return Ok(ClusterState::Absent);
        }

        let status = Invocation::new(&self.tools.pg_ctl)
            .arg("-D")
            .arg(self.paths.data_dir.as_os_str().to_os_string())
            .arg("status");
        let output = self
            .runner
            .run(&status)
            .map_err(|source| PostgresError::Spawn {
                tool: "pg_ctl".to_string(),
                source,
            })?;
        Ok(match output.status {
            Some(0) => ClusterState::Running,
            Some(4) => ClusterState::Absent,
            _ if recorded == Some(ClusterState::Initialized) => ClusterState::Initialized,
            _ => ClusterState::Stopped,
        })
    }

    /// Destroys and recreates the data directory, then runs `initdb`.
    ///
    /// Destructive: anything already in the data directory is lost. Only meant
    /// for first-time setup.
    pub fn initialize(&self) -> std::result::Result<(), PostgresError> {
        let data_dir = &self.paths.data_dir;
        fs::create_dir_all(&self.config.base_dir)
            .map_err(|err| PostgresError::filesystem(&self.config.base_dir, err))?;
        self.record(ClusterState::Initializing)?;

        if data_dir.exists() {
            info!(data_dir = %data_dir.display(), "removing existing data directory");
            fs::remove_dir_all(data_dir).map_err(|err| PostgresError::filesystem(data_dir, err))?;
        }
        create_private_dir(data_dir)?;

        let mut pwfile = tempfile::Builder::new()
            .prefix(".pwfile")
            .tempfile_in(&self.config.base_dir)
            .map_err(|err| PostgresError::filesystem(&self.config.base_dir, err))?;
        writeln!(pwfile, "{}", self.config.password)
            .map_err(|err| PostgresError::filesystem(pwfile.path(), err))?;

        let invocation = Invocation::new(&self.tools.initdb)
            .arg("-D")
            .arg(data_dir.as_os_str().to_os_string())
            .args(["--locale=C", "--encoding=UTF8", "--auth=password"])
            .args(["-U", &self.config.user])
            .arg(format!("--pwfile={}", pwfile.path().display()));
        self.runner.run_checked(&invocation)?;
        drop(pwfile);

        self.record(ClusterState::Initialized)?;
        info!(data_dir = %data_dir.display(), "initialized PostgreSQL data directory");
        Ok(())
    }

    /// Overwrites the server configuration file in the data directory.
    pub fn configure(&self) -> std::result::Result<(), PostgresError> {
        let contents = server_config(self.config, &self.paths);
        fs::write(&self.paths.config_file, contents)
            .map_err(|err| PostgresError::filesystem(&self.paths.config_file, err))?;
        debug!(path = %self.paths.config_file.display(), "wrote server configuration");
        Ok(())
    }

    /// Starts the server and waits until it accepts connections.
    pub fn start(&self) -> std::result::Result<(), PostgresError> {
        create_private_dir(&self.paths.run_dir)?;
        let options = format!(
            "-k '{}' -h {} -p {}",
            self.paths.run_dir.display(),
            self.config.host,
            self.config.port
        );
        let invocation = Invocation::new(&self.tools.pg_ctl)
            .arg("-D")
            .arg(self.paths.data_dir.as_os_str().to_os_string())
            .arg("-l")
            .arg(self.paths.log_path.as_os_str().to_os_string())
            .args(["-w", "-o"])
            .arg(options)
            .arg("start");
        self.runner.run_checked(&invocation)?;
        self.record(ClusterState::Running)?;
        info!(port = self.config.port, socket = %self.paths.run_dir.display(), "PostgreSQL started");
        Ok(())
    }

    /// Creates the configured database if the server does not have it yet.
    pub fn ensure_database(&self) -> std::result::Result<bool, PostgresError> {
        self.client().ensure_database(&self.config.database)
    }

    /// Fast shutdown, waiting for the server to exit.
    pub fn stop(&self) -> std::result::Result<(), PostgresError> {
        let invocation = Invocation::new(&self.tools.pg_ctl)
            .arg("-D")
            .arg(self.paths.data_dir.as_os_str().to_os_string())
            .args(["-m", "fast", "-w"])
            .arg("stop");
        self.runner.run_checked(&invocation)?;
        self.record(ClusterState::Stopped)?;
        info!("PostgreSQL stopped");
        Ok(())
    }

    /// initialize → configure → stop (best effort) → start → ensure_database → stop.
    ///
    /// The first failing step aborts the rest and is reported by name.
    pub fn setup(&self) -> Result<SetupReport> {
        step(SetupStep::Initialize, self.initialize())?;
        step(SetupStep::Configure, self.configure())?;
        if let Err(err) = self.stop() {
            debug!(error = %err, "no running instance to stop");
        }
        step(SetupStep::Start, self.start())?;
        let database_created = step(SetupStep::EnsureDatabase, self.ensure_database())?;
        step(SetupStep::Stop, self.stop())?;
        Ok(SetupReport {
            data_dir: self.paths.data_dir.clone(),
            database: self.config.database.clone(),
            database_created,
            state: ClusterState::Stopped,
        })
    }
}

fn step<T>(step: SetupStep, result: std::result::Result<T, PostgresError>) -> Result<T> {
    result.map_err(|source| {
        tracing::error!(%step, error = %source, "setup aborted");
        Error::Setup { step, source }
    })
}

/// Minimal `postgresql.conf` for a socket-first local server.
pub(crate) fn server_config(config: &ConnectionConfig, paths: &DerivedPaths) -> String {
    format!(
        "listen_addresses = '{}'\n\
         port = {}\n\
         unix_socket_directories = '{}'\n\
         unix_socket_permissions = 0700\n",
        config.host,
        config.port,
        paths.run_dir.display()
    )
}

fn create_private_dir(path: &Path) -> std::result::Result<(), PostgresError> {
    fs::create_dir_all(path).map_err(|err| PostgresError::filesystem(path, err))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o700))
            .map_err(|err| PostgresError::filesystem(path, err))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::postgres::testing::{failed, ok, summary, FakeRunner};
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> ConnectionConfig {
        ConnectionConfig::defaults(&Environment::new(dir.path(), dir.path()))
    }

    /// Mimics the binaries closely enough for the sequence to run.
    fn fake_postgres() -> FakeRunner {
        FakeRunner::new(|inv| match summary(inv).as_str() {
            "initdb" => {
                let data = inv.arg_after("-D").expect("initdb -D");
                fs::write(data.join(VERSION_MARKER), "16\n").expect("marker");
                fs::write(data.join("postgresql.conf"), "# initdb defaults\n").expect("conf");
                ok("")
            }
            "pg_ctl stop" => failed(1, "pg_ctl: PID file does not exist\n"),
            "psql" => ok("postgres\ntemplate0\ntemplate1\n"),
            _ => ok(""),
        })
    }

    #[test]
    fn setup_runs_steps_in_order() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir);
        let runner = fake_postgres();
        let cluster = Cluster::new(&config, Toolchain::in_dir("/pg/bin"), &runner);

        let err = cluster.setup().unwrap_err();
        // the final stop fails with the fake, which is what we want to see
        assert!(matches!(
            err,
            Error::Setup {
                step: SetupStep::Stop,
                ..
            }
        ));
        assert_eq!(
            runner.tools(),
            vec![
                "initdb",
                "pg_ctl stop",
                "pg_ctl start",
                "psql",
                "createdb",
                "pg_ctl stop"
            ]
        );
    }

    #[test]
    fn setup_reports_success() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir);
        let runner = FakeRunner::new(|inv| match summary(inv).as_str() {
            "initdb" => {
                let data = inv.arg_after("-D").expect("initdb -D");
                fs::write(data.join(VERSION_MARKER), "16\n").expect("marker");
                ok("")
            }
            "psql" => ok("postgres\niowa_liquor_sales\n"),
            _ => ok(""),
        });
        let cluster = Cluster::new(&config, Toolchain::in_dir("/pg/bin"), &runner);
        let report = cluster.setup().unwrap();
        assert!(!report.database_created);
        assert_eq!(report.database, "iowa_liquor_sales");
        assert!(!runner.tools().contains(&"createdb".to_string()));

        let conf = fs::read_to_string(&cluster.paths().config_file).unwrap();
        assert!(conf.contains("port = 15432"));
        assert!(conf.contains("unix_socket_permissions = 0700"));
        assert!(!conf.contains("initdb defaults"));
    }

    #[test]
    fn initdb_failure_short_circuits() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir);
        let runner = FakeRunner::new(|inv| {
            if inv.tool_name() == "initdb" {
                failed(1, "initdb: error: invalid locale\n")
            } else {
                ok("")
            }
        });
        let cluster = Cluster::new(&config, Toolchain::in_dir("/pg/bin"), &runner);
        let err = cluster.setup().unwrap_err();
        assert_eq!(
            err.to_string(),
            "failed to initialize PostgreSQL: initdb exited with status 1: initdb: error: invalid locale"
        );
        assert_eq!(runner.tools(), vec!["initdb"]);
        assert_eq!(cluster.observe().unwrap(), ClusterState::Absent);
    }

    #[test]
    fn initialize_wipes_previous_contents() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir);
        let runner = fake_postgres();
        let cluster = Cluster::new(&config, Toolchain::in_dir("/pg/bin"), &runner);
        let data_dir = cluster.paths().data_dir.clone();
        fs::create_dir_all(data_dir.join("base")).unwrap();
        fs::write(data_dir.join("base").join("16384"), b"old rows").unwrap();

        cluster.initialize().unwrap();

        let entries: Vec<String> = fs::read_dir(&data_dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(entries.contains(&VERSION_MARKER.to_string()));
        assert!(!data_dir.join("base").exists());
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&data_dir).unwrap().permissions().mode() & 0o777;
            assert_eq!(mode, 0o700);
        }
        let calls = runner.calls.borrow();
        let initdb = &calls[0];
        assert!(initdb.has_arg("--locale=C"));
        assert!(initdb.has_arg("--encoding=UTF8"));
        assert!(initdb.has_arg("--auth=password"));
        assert!(initdb.has_arg("pguser"));
        let leftover_pwfiles = fs::read_dir(&config.base_dir)
            .unwrap()
            .filter(|e| {
                e.as_ref()
                    .unwrap()
                    .file_name()
                    .to_string_lossy()
                    .starts_with(".pwfile")
            })
            .count();
        assert_eq!(leftover_pwfiles, 0);
    }

    #[test]
    fn observe_tracks_recorded_state() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir);
        let runner = FakeRunner::new(|inv| match summary(inv).as_str() {
            "initdb" => {
                let data = inv.arg_after("-D").expect("initdb -D");
                fs::write(data.join(VERSION_MARKER), "16\n").expect("marker");
                ok("")
            }
            "pg_ctl status" => failed(3, "pg_ctl: no server running\n"),
            _ => ok(""),
        });
        let cluster = Cluster::new(&config, Toolchain::in_dir("/pg/bin"), &runner);
        assert_eq!(cluster.observe().unwrap(), ClusterState::Absent);
        cluster.initialize().unwrap();
        assert_eq!(cluster.observe().unwrap(), ClusterState::Initialized);
        cluster.start().unwrap();
        cluster.stop().unwrap();
        assert_eq!(cluster.observe().unwrap(), ClusterState::Stopped);
    }

    #[test]
    fn start_passes_socket_options() {
        let dir = TempDir::new().expect("tempdir");
        let config = config_in(&dir);
        let runner = FakeRunner::succeeding();
        let cluster = Cluster::new(&config, Toolchain::in_dir("/pg/bin"), &runner);
        cluster.start().unwrap();
        assert!(cluster.paths().run_dir.is_dir());
        let calls = runner.calls.borrow();
        let options = calls[0].arg_after("-o").expect("-o value");
        assert_eq!(
            options.to_string_lossy(),
            format!(
                "-k '{}' -h 127.0.0.1 -p 15432",
                cluster.paths().run_dir.display()
            )
        );
        assert!(calls[0].has_arg("-w"));
    }
}

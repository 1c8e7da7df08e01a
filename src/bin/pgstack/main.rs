//! `pgstack` command-line entry point.
//!
//! Commands whose stdout is meant for `eval` (`activate`, `env`,
//! `configure`) write every human-facing line to stderr.

mod prompt;
mod ui;

use std::collections::BTreeMap;
use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use pgstack::config::{Environment, Resolved, Resolver};
use pgstack::fetch::{self, DownloadOutcome, Downloader, FetchError, FetchOutcome, FetchReport, ResourceFetcher};
use pgstack::loader::{resolve_csv_path, LoadReport, Loader};
use pgstack::logging::{directive_for, init_logging, LogHandle};
use pgstack::postgres::{Cluster, ClusterState, CommandRunner, Invocation, SetupReport, SystemRunner, Toolchain};
use pgstack::schema::{SchemaMode, SchemaOutcome, StarSchema};
use pgstack::settings::Settings;
use pgstack::shell::Shell;
use serde::Serialize;
use tracing::{info, warn};

use prompt::CliPrompter;
use ui::{ColorChoice, Ui};

type CliResult<T = ()> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(
    name = "pgstack",
    version,
    about = "Local PostgreSQL + Metabase environment with the Iowa liquor sales dataset",
    propagate_version = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Text,
        help = "Output format for reports"
    )]
    format: OutputFormat,

    #[arg(
        long,
        global = true,
        value_name = "FILE",
        env = "PGSTACK_SETTINGS",
        help = "Settings file (default: .flox/pgstack.toml, then the user config dir)"
    )]
    settings: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = ColorChoice::Auto)]
    color: ColorChoice,

    #[arg(long, short, global = true, help = "Plain, undecorated output")]
    quiet: bool,

    #[arg(long, global = true, help = "Accept wizard defaults instead of prompting")]
    defaults: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve the configuration, fetch resources, initialize the cluster
    /// if needed and print shell exports
    Activate {
        #[arg(long, value_enum, default_value_t = Shell::Bash)]
        shell: Shell,
        #[arg(long, help = "Do not download missing resources")]
        skip_fetch: bool,
    },
    /// Print shell exports for the resolved configuration
    Env {
        #[arg(long, value_enum, default_value_t = Shell::Bash)]
        shell: Shell,
    },
    /// Re-run the configuration wizard, restart the service and print the
    /// new exports
    #[command(alias = "pgconfigure")]
    Configure {
        #[arg(long, value_enum, default_value_t = Shell::Bash)]
        shell: Shell,
        #[arg(long, help = "Skip the service restart")]
        no_restart: bool,
    },
    /// Create a fresh cluster: initdb, configure, start, create database, stop
    Setup {
        #[arg(long, help = "Re-initialize even if a cluster exists (destroys data)")]
        force: bool,
    },
    /// Start the server
    Start,
    /// Stop the server
    Stop,
    /// Show the cluster state
    Status,
    /// Show connection details
    Info,
    /// Print the environment README
    Readme,
    /// Download one file, cancellable with Ctrl-C
    Fetch {
        url: String,
        #[arg(long, short, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Load the sample CSV into the staging table
    Populate {
        #[arg(long, value_name = "FILE", help = "CSV path (default: $IOWA_LIQUOR_CSV or settings)")]
        csv: Option<PathBuf>,
        #[arg(long, help = "Also create and populate the star schema")]
        star: bool,
    },
    /// Create the star schema
    Schema {
        #[arg(long, conflicts_with = "force", help = "Only list existing tables")]
        check: bool,
        #[arg(long, help = "Drop existing star tables first")]
        force: bool,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

struct Context {
    env: Environment,
    settings: Settings,
    ui: Ui,
    log: LogHandle,
    format: OutputFormat,
    accept_defaults: bool,
}

impl Context {
    fn prompter(&self) -> CliPrompter {
        CliPrompter::select(self.accept_defaults, self.ui.paints())
    }

    fn resolve(&self) -> CliResult<Resolved> {
        let mut prompter = self.prompter();
        let resolved = Resolver::new(&self.env).resolve(&mut prompter)?;
        self.log.follow_config(&self.env, resolved.config.debug)?;
        if !resolved.overridden.is_empty() {
            info!(keys = ?resolved.overridden, "environment overrides persisted values");
        }
        Ok(resolved)
    }

    fn emit<T, F>(&self, value: &T, printer: F) -> CliResult
    where
        T: Serialize,
        F: FnOnce(&Ui),
    {
        match self.format {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Text => printer(&self.ui),
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run() -> CliResult {
    let cli = Cli::parse();
    let env = Environment::from_process()?;
    let log = init_logging(&directive_for(&env))?;
    let settings = Settings::load(cli.settings.as_deref(), &env)?;
    let evaluated = matches!(
        cli.command,
        Command::Activate { .. } | Command::Env { .. } | Command::Configure { .. }
    );
    let ctx = Context {
        env,
        settings,
        ui: Ui::new(cli.color, cli.quiet, evaluated),
        log,
        format: cli.format,
        accept_defaults: cli.defaults,
    };

    match cli.command {
        Command::Activate { shell, skip_fetch } => activate(&ctx, shell, skip_fetch),
        Command::Env { shell } => {
            let resolved = ctx.resolve()?;
            print_exports(&ctx, &resolved, shell)
        }
        Command::Configure { shell, no_restart } => configure(&ctx, shell, no_restart),
        Command::Setup { force } => setup(&ctx, force),
        Command::Start => {
            let resolved = ctx.resolve()?;
            let cluster = Cluster::new(&resolved.config, Toolchain::discover()?, SystemRunner);
            let task = ctx.ui.task("Starting PostgreSQL");
            cluster.start()?;
            task.finish();
            Ok(())
        }
        Command::Stop => {
            let resolved = ctx.resolve()?;
            let cluster = Cluster::new(&resolved.config, Toolchain::discover()?, SystemRunner);
            let task = ctx.ui.task("Stopping PostgreSQL");
            cluster.stop()?;
            task.finish();
            Ok(())
        }
        Command::Status => status(&ctx),
        Command::Info => {
            let resolved = ctx.resolve()?;
            ctx.emit(&resolved, |ui| print_info(ui, &resolved, &ctx.settings))
        }
        Command::Readme => readme(&ctx),
        Command::Fetch { url, output } => fetch_one(&ctx, &url, output).await,
        Command::Populate { csv, star } => populate(&ctx, csv, star),
        Command::Schema { check, force } => {
            let mode = match (check, force) {
                (true, _) => SchemaMode::Check,
                (false, true) => SchemaMode::Force,
                (false, false) => SchemaMode::Create,
            };
            schema(&ctx, mode)
        }
        Command::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "pgstack", &mut io::stdout());
            Ok(())
        }
    }
}

#[derive(Serialize)]
struct ActivateReport<'a> {
    variables: BTreeMap<&'static str, String>,
    resources: Option<&'a FetchReport>,
    setup: Option<&'a SetupReport>,
}

/// Everything a shell hook needs. Only the exports go to stdout.
fn activate(ctx: &Context, shell: Shell, skip_fetch: bool) -> CliResult {
    let resolved = ctx.resolve()?;

    let resources = (!skip_fetch).then(|| {
        let fetcher = ResourceFetcher::new(
            ctx.settings.base_url(),
            ctx.env.project_root(),
            Downloader::discover(),
            SystemRunner,
        );
        fetcher.fetch_missing()
    });
    if let Some(report) = &resources {
        for (file, reason) in report.failed() {
            ctx.ui.warn(&format!("could not fetch {file}: {reason}"));
        }
    }

    let cluster = Cluster::new(&resolved.config, Toolchain::discover()?, SystemRunner);
    let state = cluster.observe()?;
    let setup = if state.is_initialized() {
        info!(%state, data_dir = %resolved.paths.data_dir.display(), "cluster already initialized");
        None
    } else {
        Some(cluster.setup()?)
    };

    match ctx.format {
        OutputFormat::Json => {
            let report = ActivateReport {
                variables: resolved.variables().into_iter().collect(),
                resources: resources.as_ref(),
                setup: setup.as_ref(),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => print!("{}", shell.render(exports(&resolved).iter().map(|(k, v)| (*k, v.as_str())))),
    }
    Ok(())
}

fn exports(resolved: &Resolved) -> Vec<(&'static str, String)> {
    resolved.variables()
}

fn print_exports(ctx: &Context, resolved: &Resolved, shell: Shell) -> CliResult {
    let variables = exports(resolved);
    match ctx.format {
        OutputFormat::Json => {
            let map: BTreeMap<&str, &str> = variables.iter().map(|(k, v)| (*k, v.as_str())).collect();
            println!("{}", serde_json::to_string_pretty(&map)?);
        }
        OutputFormat::Text => print!("{}", shell.render(variables.iter().map(|(k, v)| (*k, v.as_str())))),
    }
    Ok(())
}

/// Shells that ran `activate` still carry the old values, and exported
/// values win over the file, so the new exports are printed for `eval`.
fn configure(ctx: &Context, shell: Shell, no_restart: bool) -> CliResult {
    let mut prompter = ctx.prompter();
    let resolved = Resolver::new(&ctx.env).reconfigure(&mut prompter)?;
    ctx.log.follow_config(&ctx.env, resolved.config.debug)?;
    ctx.ui.success(&format!("Saved {}", resolved.config_path.display()));

    match ctx.settings.restart_command() {
        Some(command) if !no_restart => restart_service(&ctx.ui, command),
        _ => ctx.ui.info("Restart the postgres service to apply the new settings"),
    }
    print_exports(ctx, &resolved, shell)
}

/// A failed restart leaves the saved configuration in place.
fn restart_service(ui: &Ui, command: &str) {
    let task = ui.task(format!("Running {command}"));
    let invocation = Invocation::new("sh").args(["-c", command]);
    match SystemRunner.run(&invocation) {
        Ok(output) if output.success() => task.finish(),
        Ok(output) => {
            drop(task);
            warn!(command, stderr = %output.stderr.trim(), "service restart failed");
            ui.warn(&format!("`{command}` failed; restart the service manually"));
        }
        Err(err) => {
            drop(task);
            ui.warn(&format!("could not run `{command}`: {err}"));
        }
    }
}

fn setup(ctx: &Context, force: bool) -> CliResult {
    let resolved = ctx.resolve()?;
    let cluster = Cluster::new(&resolved.config, Toolchain::discover()?, SystemRunner);
    let state = cluster.observe()?;
    if state.is_initialized() && !force {
        ctx.ui.info(&format!(
            "Cluster at {} is already initialized ({state}); use --force to recreate it",
            resolved.paths.data_dir.display()
        ));
        return Ok(());
    }
    if state == ClusterState::Running {
        cluster.stop()?;
    }
    let task = ctx.ui.task("Setting up PostgreSQL");
    let report = cluster.setup()?;
    task.finish();
    ctx.emit(&report, |ui| {
        ui.section(
            "Cluster",
            [
                ("data dir", report.data_dir.display().to_string()),
                ("database", report.database.clone()),
                ("created", report.database_created.to_string()),
                ("state", report.state.to_string()),
            ],
        )
    })
}

#[derive(Serialize)]
struct StatusReport<'a> {
    state: ClusterState,
    data_dir: &'a Path,
    log_path: &'a Path,
    config_path: &'a Path,
}

fn status(ctx: &Context) -> CliResult {
    let resolved = ctx.resolve()?;
    let cluster = Cluster::new(&resolved.config, Toolchain::discover()?, SystemRunner);
    let report = StatusReport {
        state: cluster.observe()?,
        data_dir: &resolved.paths.data_dir,
        log_path: &resolved.paths.log_path,
        config_path: &resolved.config_path,
    };
    ctx.emit(&report, |ui| {
        ui.section(
            "Status",
            [
                ("state", report.state.to_string()),
                ("data dir", report.data_dir.display().to_string()),
                ("log", report.log_path.display().to_string()),
                ("config", report.config_path.display().to_string()),
            ],
        )
    })
}

fn print_info(ui: &Ui, resolved: &Resolved, settings: &Settings) {
    let config = &resolved.config;
    ui.section(
        "Connection",
        [
            ("host", config.host.clone()),
            ("port", config.port.to_string()),
            ("user", config.user.clone()),
            ("password", "*".repeat(config.password.len().min(8))),
            ("database", config.database.clone()),
            ("url", resolved.paths.database_url.clone()),
        ],
    );
    ui.section(
        "Locations",
        [
            ("base dir", config.base_dir.display().to_string()),
            ("data dir", resolved.paths.data_dir.display().to_string()),
            ("socket dir", resolved.paths.run_dir.display().to_string()),
            ("log", resolved.paths.log_path.display().to_string()),
            ("config", resolved.config_path.display().to_string()),
            (
                "settings",
                settings
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "(defaults)".to_string()),
            ),
        ],
    );
    ui.list(
        "Commands",
        [
            "pgstack configure   re-run the wizard".to_string(),
            "pgstack populate    load the sample dataset".to_string(),
            "pgstack schema      create the star schema".to_string(),
            "pgstack readme      show the README".to_string(),
        ],
        "",
    );
}

fn readme(ctx: &Context) -> CliResult {
    let path = ctx.env.project_root().join("README.md");
    if !path.is_file() {
        return Err(pgstack::Error::MissingInput(path).into());
    }
    print!("{}", fs::read_to_string(&path)?);
    Ok(())
}

async fn fetch_one(ctx: &Context, url: &str, output: Option<PathBuf>) -> CliResult {
    let dest = output.unwrap_or_else(|| default_output(url));
    let downloader = Downloader::discover().into_iter().next().ok_or(FetchError::NoTool)?;
    let task = ctx.ui.task(format!("Downloading {} with {}", dest.display(), downloader.tool()));
    match fetch::download(&downloader, url, &dest).await? {
        DownloadOutcome::Completed(path) => {
            task.finish();
            ctx.emit(
                &FetchOutcome::Downloaded {
                    tool: downloader.tool(),
                },
                |ui| ui.info(&format!("Saved {}", path.display())),
            )
        }
        DownloadOutcome::Interrupted => {
            drop(task);
            Err(FetchError::Interrupted(dest).into())
        }
    }
}

fn default_output(url: &str) -> PathBuf {
    let name = url
        .split(['?', '#'])
        .next()
        .and_then(|path| path.rsplit('/').find(|segment| !segment.is_empty()))
        .filter(|segment| !segment.contains(':'))
        .unwrap_or("download");
    PathBuf::from(name)
}

fn populate(ctx: &Context, csv: Option<PathBuf>, star: bool) -> CliResult {
    let resolved = ctx.resolve()?;
    let csv = resolve_csv_path(csv.as_deref(), &ctx.env, &ctx.settings);
    let tools = Toolchain::discover()?;
    let cluster = Cluster::new(&resolved.config, tools, SystemRunner);
    let client = cluster.client();
    let task = ctx.ui.task(format!("Loading {}", csv.display()));
    let report = Loader::new(&client, &resolved.config.database)
        .with_star(star)
        .load(&csv)?;
    task.finish();
    ctx.emit(&report, |ui| print_load_report(ui, &report))
}

fn print_load_report(ui: &Ui, report: &LoadReport) {
    for validation in &report.validations {
        ui.block(&validation.title, &validation.rows);
    }
    if let Some(counts) = &report.star {
        ui.section(
            "Star schema",
            [
                ("dim_date", counts.dates),
                ("dim_store", counts.stores),
                ("dim_product", counts.products),
                ("dim_vendor", counts.vendors),
                ("fact_sales", counts.facts),
            ],
        );
    }
    ui.success(&format!("Loaded {} into {}", report.csv.display(), report.database));
}

fn schema(ctx: &Context, mode: SchemaMode) -> CliResult {
    let resolved = ctx.resolve()?;
    let cluster = Cluster::new(&resolved.config, Toolchain::discover()?, SystemRunner);
    let client = cluster.client();
    let database = &resolved.config.database;
    if mode != SchemaMode::Check && client.ensure_database(database)? {
        info!(database = %database, "created database");
    }
    let outcome = StarSchema::new(&client, database).apply(mode)?;
    ctx.emit(&outcome, |ui| match &outcome {
        SchemaOutcome::Existing { tables } => {
            ui.list("Existing star tables", tables.iter().cloned(), "(none)")
        }
        SchemaOutcome::Created { dropped } => {
            if !dropped.is_empty() {
                ui.info(&format!("Dropped {} existing tables", dropped.len()));
            }
            ui.success(&format!("Star schema created in {database}"));
        }
    })
}

#![allow(missing_docs)]

use std::fs;
use std::path::Path;

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use serde_json::Value;
use tempfile::TempDir;

const CONNECTION_VARS: [&str; 8] = [
    "PGHOSTADDR",
    "PGPORT",
    "PGUSER",
    "PGPASS",
    "PGDATABASE",
    "PGDIR",
    "PG_DEBUG",
    "PGSTACK_SETTINGS",
];

/// `pgstack` isolated inside `dir`: project, cache and user config all live there.
fn pgstack(dir: &Path) -> Command {
    let mut cmd = cargo_bin_cmd!("pgstack");
    for var in CONNECTION_VARS {
        cmd.env_remove(var);
    }
    cmd.env("FLOX_ENV_PROJECT", dir.join("project"))
        .env("FLOX_ENV_CACHE", dir.join("cache"))
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join("xdg"))
        .env("PGSTACK_LOG", "warn");
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.assert().success().get_output().stdout.clone();
    String::from_utf8(output).expect("utf8 stdout")
}

#[test]
fn env_with_defaults_prints_bash_exports_and_persists_config() {
    let dir = TempDir::new().expect("tempdir");
    let out = stdout_of(pgstack(dir.path()).args(["env", "--defaults", "--shell", "bash"]));

    assert!(out.contains("export PGDATABASE=iowa_liquor_sales;"), "{out}");
    assert!(out.contains("export PGPORT=15432;"), "{out}");
    assert!(out.contains("export PGHOSTADDR=127.0.0.1;"), "{out}");
    let pgdata = dir.path().join("cache").join("postgres").join("data");
    assert!(out.contains(&format!("export PGDATA={};", pgdata.display())), "{out}");
    assert!(out.lines().all(|line| line.starts_with("export ")), "{out}");

    let saved = dir.path().join("cache").join("pgstack").join("pgconfig.env");
    let contents = fs::read_to_string(&saved).expect("config persisted");
    assert!(contents.contains("PGUSER=pguser"), "{contents}");
}

#[test]
fn fish_exports_use_set_gx() {
    let dir = TempDir::new().expect("tempdir");
    let out = stdout_of(pgstack(dir.path()).args(["env", "--defaults", "--shell", "fish"]));
    assert!(out.contains("set -gx PGPORT '15432';"), "{out}");
    assert!(!out.contains("export "), "{out}");
}

#[test]
fn environment_overrides_persisted_port_for_one_run() {
    let dir = TempDir::new().expect("tempdir");
    stdout_of(pgstack(dir.path()).args(["env", "--defaults"]));

    let out = stdout_of(pgstack(dir.path()).env("PGPORT", "25432").args(["env"]));
    assert!(out.contains("export PGPORT=25432;"), "{out}");

    let out = stdout_of(pgstack(dir.path()).args(["env"]));
    assert!(out.contains("export PGPORT=15432;"), "{out}");
}

#[test]
fn configure_prints_new_exports_on_stdout() {
    let dir = TempDir::new().expect("tempdir");
    stdout_of(pgstack(dir.path()).args(["env", "--defaults"]));

    let out = stdout_of(pgstack(dir.path()).env("PGPORT", "25432").args([
        "configure",
        "--defaults",
        "--no-restart",
    ]));
    assert!(out.contains("export PGPORT=25432;"), "{out}");
    assert!(out.lines().all(|line| line.starts_with("export ")), "{out}");

    let out = stdout_of(pgstack(dir.path()).args(["env"]));
    assert!(out.contains("export PGPORT=25432;"), "{out}");
}

#[test]
fn failed_restart_still_prints_exports() {
    let dir = TempDir::new().expect("tempdir");
    let flox = dir.path().join("project").join(".flox");
    fs::create_dir_all(&flox).expect("mkdir");
    fs::write(
        flox.join("pgstack.toml"),
        "[services]\nrestart_command = \"exit 3\"\n",
    )
    .expect("write settings");

    let output = pgstack(dir.path())
        .args(["configure", "--defaults", "--shell", "fish"])
        .assert()
        .success()
        .get_output()
        .clone();
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stdout.contains("set -gx PGPORT '15432';"), "{stdout}");
    assert!(stdout.lines().all(|line| line.starts_with("set -gx ")), "{stdout}");
    assert!(stderr.contains("`exit 3` failed"), "{stderr}");
}

#[test]
fn info_json_reports_paths_without_password() {
    let dir = TempDir::new().expect("tempdir");
    let out = stdout_of(pgstack(dir.path()).args(["--format", "json", "--defaults", "info"]));
    let json: Value = serde_json::from_str(&out).expect("valid json");

    assert_eq!(json["config"]["port"], 15432);
    assert_eq!(json["config"]["database"], "iowa_liquor_sales");
    assert!(json["config"].get("password").is_none());
    assert_eq!(json["source"], "wizard");
    let url = json["paths"]["database_url"].as_str().expect("url");
    assert!(url.starts_with("postgresql:///iowa_liquor_sales?host="), "{url}");
    assert!(url.ends_with("&port=15432"), "{url}");
}

#[test]
fn malformed_config_file_fails_with_message() {
    let dir = TempDir::new().expect("tempdir");
    let saved = dir.path().join("cache").join("pgstack");
    fs::create_dir_all(&saved).expect("mkdir");
    fs::write(saved.join("pgconfig.env"), "PGPORT=not-a-port\n").expect("write");

    let output = pgstack(dir.path())
        .args(["env"])
        .assert()
        .failure()
        .get_output()
        .clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("error: "), "{stderr}");
    assert!(output.stdout.is_empty());
}

#[test]
fn readme_requires_the_file() {
    let dir = TempDir::new().expect("tempdir");
    fs::create_dir_all(dir.path().join("project")).expect("mkdir");
    pgstack(dir.path()).args(["readme"]).assert().failure();

    fs::write(dir.path().join("project").join("README.md"), "# Iowa liquor\n").expect("write");
    let out = stdout_of(pgstack(dir.path()).args(["readme"]));
    assert_eq!(out, "# Iowa liquor\n");
}

#[test]
fn completions_are_generated() {
    let dir = TempDir::new().expect("tempdir");
    let out = stdout_of(pgstack(dir.path()).args(["completions", "bash"]));
    assert!(out.contains("pgstack"), "{out}");
}

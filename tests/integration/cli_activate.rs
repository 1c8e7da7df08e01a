#![allow(missing_docs)]
#![cfg(unix)]

//! `pgstack activate` against stand-in PostgreSQL and download tools that
//! record their invocations.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use tempfile::TempDir;

const INITDB: &str = r#"#!/bin/sh
echo "initdb $*" >> "$PGSTACK_TOOL_LOG"
while [ $# -gt 0 ]; do
  if [ "$1" = "-D" ]; then
    shift
    echo 16 > "$1/PG_VERSION"
  fi
  shift
done
"#;

const PG_CTL: &str = r#"#!/bin/sh
echo "pg_ctl $*" >> "$PGSTACK_TOOL_LOG"
for last; do :; done
running="$PGSTACK_TOOL_LOG.running"
case "$last" in
  status) [ -f "$running" ] && exit 0; exit 3 ;;
  start) touch "$running" ;;
  stop) [ -f "$running" ] || exit 1; rm -f "$running" ;;
esac
"#;

const LOGGED: &str = r#"#!/bin/sh
echo "$(basename "$0") $*" >> "$PGSTACK_TOOL_LOG"
"#;

const UNREACHABLE: &str = r#"#!/bin/sh
echo "$(basename "$0"): could not resolve host" >&2
exit 6
"#;

struct Sandbox {
    dir: TempDir,
    bin: PathBuf,
    log: PathBuf,
}

impl Sandbox {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let bin = dir.path().join("bin");
        fs::create_dir_all(&bin).expect("bin dir");
        for (name, body) in [
            ("initdb", INITDB),
            ("pg_ctl", PG_CTL),
            ("psql", LOGGED),
            ("createdb", LOGGED),
            ("curl", UNREACHABLE),
            ("wget", UNREACHABLE),
        ] {
            write_script(&bin.join(name), body);
        }
        let log = dir.path().join("tools.log");
        Self { dir, bin, log }
    }

    fn pgstack(&self) -> Command {
        let root = self.dir.path();
        let mut cmd = cargo_bin_cmd!("pgstack");
        for var in ["PGHOSTADDR", "PGPORT", "PGUSER", "PGPASS", "PGDATABASE", "PGDIR", "PG_DEBUG"] {
            cmd.env_remove(var);
        }
        cmd.env("PATH", format!("{}:/usr/bin:/bin", self.bin.display()))
            .env("PGSTACK_TOOL_LOG", &self.log)
            .env("FLOX_ENV_PROJECT", root.join("project"))
            .env("FLOX_ENV_CACHE", root.join("cache"))
            .env("HOME", root)
            .env("XDG_CONFIG_HOME", root.join("xdg"))
            .env("PGSTACK_LOG", "warn");
        cmd
    }

    fn calls(&self, tool: &str) -> usize {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .filter(|line| line.split_whitespace().next() == Some(tool))
            .count()
    }
}

fn write_script(path: &Path, body: &str) {
    fs::write(path, body).expect("write script");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod");
}

fn run(cmd: &mut Command) -> (String, String) {
    let output = cmd.assert().success().get_output().clone();
    (
        String::from_utf8_lossy(&output.stdout).into_owned(),
        String::from_utf8_lossy(&output.stderr).into_owned(),
    )
}

#[test]
fn first_activation_sets_up_and_later_ones_skip() {
    let sandbox = Sandbox::new();

    let (stdout, _) = run(sandbox.pgstack().args(["activate", "--skip-fetch", "--defaults"]));
    assert!(stdout.contains("export PGPORT=15432;"), "{stdout}");
    assert!(stdout.contains("export PGDATABASE=iowa_liquor_sales;"), "{stdout}");
    assert!(stdout.lines().all(|line| line.starts_with("export ")), "{stdout}");
    assert_eq!(sandbox.calls("initdb"), 1);
    assert_eq!(sandbox.calls("createdb"), 1);
    let data = sandbox.dir.path().join("cache/postgres/data");
    assert!(data.join("PG_VERSION").is_file());
    assert!(data.join("postgresql.conf").is_file());

    let (again, _) = run(sandbox.pgstack().args(["activate", "--skip-fetch", "--defaults"]));
    assert_eq!(again, stdout);
    assert_eq!(sandbox.calls("initdb"), 1, "setup must not run twice");
    assert_eq!(sandbox.calls("createdb"), 1);
}

#[test]
fn download_failures_do_not_abort_activation() {
    let sandbox = Sandbox::new();

    let (stdout, stderr) = run(sandbox.pgstack().args(["activate", "--defaults"]));
    assert!(stdout.contains("export PGPORT=15432;"), "{stdout}");
    assert!(stderr.contains("could not fetch README.md"), "{stderr}");
    assert!(stderr.contains("could not fetch resources/populate.sh"), "{stderr}");
    assert!(!sandbox.dir.path().join("project/README.md").exists());
    assert_eq!(sandbox.calls("initdb"), 1);
}

#[test]
fn present_resources_are_left_alone() {
    let sandbox = Sandbox::new();
    let project = sandbox.dir.path().join("project");
    fs::create_dir_all(project.join("resources")).expect("mkdir");
    fs::write(project.join("README.md"), "local copy\n").expect("readme");

    let (_, stderr) = run(sandbox.pgstack().args(["activate", "--defaults"]));
    assert!(!stderr.contains("could not fetch README.md"), "{stderr}");
    assert!(stderr.contains("could not fetch resources/schema.sql"), "{stderr}");
    assert_eq!(
        fs::read_to_string(project.join("README.md")).expect("readme"),
        "local copy\n"
    );
}

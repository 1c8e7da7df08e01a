#![allow(missing_docs)]

//! Loads the bundled sample CSV into a throwaway cluster.

use std::net::TcpListener;
use std::path::PathBuf;
use std::process::Command;

use pgstack::config::{ConnectionConfig, Environment};
use pgstack::postgres::{Cluster, SystemRunner, Toolchain};
use pgstack::loader::Loader;
use tempfile::TempDir;

fn sample_csv() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/loader/sample.csv")
}

fn toolchain() -> Option<Toolchain> {
    let root = Command::new("id")
        .arg("-u")
        .output()
        .map(|out| String::from_utf8_lossy(&out.stdout).trim() == "0")
        .unwrap_or(true);
    if root {
        eprintln!("skipping: initdb cannot run as root");
        return None;
    }
    Toolchain::discover().ok()
}

#[test]
fn sample_csv_lands_in_staging() {
    let Some(tools) = toolchain() else {
        eprintln!("skipping: PostgreSQL binaries not found");
        return;
    };
    let dir = TempDir::new().expect("tempdir");
    let env = Environment::new(dir.path().join("project"), dir.path().join("cache"));
    let port = TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("free port");
    let config = ConnectionConfig {
        port,
        base_dir: dir.path().join("pg"),
        ..ConnectionConfig::defaults(&env)
    };
    let cluster = Cluster::new(&config, tools, SystemRunner);
    cluster.setup().expect("setup");
    cluster.start().expect("start");

    let client = cluster.client();
    let result = Loader::new(&client, &config.database).load(&sample_csv());
    let _ = cluster.stop();
    let report = result.expect("load");

    assert!(!report.database_created, "setup already created it");
    assert_eq!(report.validation("Row count"), Some(&["5".to_string()][..]));
    let nulls = report.validation("NULL audit").expect("null audit");
    assert!(nulls.iter().any(|row| row == "sale_dollars|1"), "{nulls:?}");
    assert!(nulls.iter().any(|row| row == "date|0"), "{nulls:?}");
    let range = report.validation("Date range").expect("date range");
    assert!(range[0].starts_with("2023-01-05|"), "{range:?}");
    assert!(report.star.is_none());
}

#![allow(missing_docs)]

//! Lifecycle against real PostgreSQL binaries. Skipped when `initdb` is not
//! on `PATH` or when running as root (initdb refuses to).

use std::net::TcpListener;
use std::process::Command;

use pgstack::config::{ConnectionConfig, Environment};
use pgstack::postgres::{Cluster, ClusterState, SystemRunner, Toolchain};
use pgstack::schema::{partition_name, SchemaError, SchemaMode, StarSchema, FIRST_PARTITION_YEAR, LAST_PARTITION_YEAR};
use tempfile::TempDir;

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
    match Toolchain::discover() {
        Ok(tools) => Some(tools),
        Err(err) => {
            eprintln!("skipping: {err}");
            None
        }
    }
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .and_then(|listener| listener.local_addr())
        .map(|addr| addr.port())
        .expect("free port")
}

fn config_in(dir: &TempDir) -> ConnectionConfig {
    let env = Environment::new(dir.path().join("project"), dir.path().join("cache"));
    ConnectionConfig {
        port: free_port(),
        database: "liquor_it".to_string(),
        base_dir: dir.path().join("pg"),
        ..ConnectionConfig::defaults(&env)
    }
}

/// Stops the server when the test ends, pass or fail.
struct StopOnDrop<'c, 'a>(&'c Cluster<'a, SystemRunner>);

impl Drop for StopOnDrop<'_, '_> {
    fn drop(&mut self) {
        let _ = self.0.stop();
    }
}

#[test]
fn setup_then_restart_keeps_database() {
    let Some(tools) = toolchain() else { return };
    let dir = TempDir::new().expect("tempdir");
    let config = config_in(&dir);
    let cluster = Cluster::new(&config, tools, SystemRunner);

    assert_eq!(cluster.observe().expect("observe"), ClusterState::Absent);
    let report = cluster.setup().expect("setup");
    assert!(report.database_created);
    assert_eq!(report.state, ClusterState::Stopped);
    assert_eq!(cluster.observe().expect("observe"), ClusterState::Stopped);

    cluster.start().expect("start");
    let _guard = StopOnDrop(&cluster);
    assert_eq!(cluster.observe().expect("observe"), ClusterState::Running);
    assert!(!cluster.ensure_database().expect("ensure"), "database survives restart");

    let client = cluster.client();
    let databases = client.list_databases().expect("list");
    assert!(databases.iter().any(|db| db == "liquor_it"), "{databases:?}");
    let rows = client.query("liquor_it", "SHOW unix_socket_permissions").expect("show");
    assert_eq!(rows, vec!["0700".to_string()]);
}

#[test]
fn setup_reinitializes_from_scratch() {
    let Some(tools) = toolchain() else { return };
    let dir = TempDir::new().expect("tempdir");
    let config = config_in(&dir);
    let cluster = Cluster::new(&config, tools, SystemRunner);

    cluster.setup().expect("first setup");
    let marker = cluster.paths().data_dir.join("stale-marker");
    std::fs::write(&marker, "x").expect("marker");
    cluster.setup().expect("second setup");
    assert!(!marker.exists());
}

#[test]
fn star_schema_partitions_and_constraints() {
    let Some(tools) = toolchain() else { return };
    let dir = TempDir::new().expect("tempdir");
    let config = config_in(&dir);
    let cluster = Cluster::new(&config, tools, SystemRunner);
    cluster.setup().expect("setup");
    cluster.start().expect("start");
    let _guard = StopOnDrop(&cluster);

    let client = cluster.client();
    let schema = StarSchema::new(&client, "liquor_it");
    match schema.apply(SchemaMode::Create) {
        Ok(_) => {}
        Err(SchemaError::PostgisUnavailable) => {
            eprintln!("skipping: PostGIS not installed");
            return;
        }
        Err(err) => panic!("schema: {err}"),
    }

    let partitions = client
        .query(
            "liquor_it",
            "SELECT c.relname FROM pg_inherits i JOIN pg_class c ON c.oid = i.inhrelid \
             JOIN pg_class p ON p.oid = i.inhparent WHERE p.relname = 'fact_sales' ORDER BY 1",
        )
        .expect("partitions");
    let expected: Vec<String> = (FIRST_PARTITION_YEAR..=LAST_PARTITION_YEAR).map(partition_name).collect();
    assert_eq!(partitions, expected);

    let insert_store = |store: i32, county: i32| {
        client.query(
            "liquor_it",
            &format!("INSERT INTO dim_store (store_number, county_number) VALUES ({store}, {county})"),
        )
    };
    assert!(insert_store(1, 100).is_err(), "Iowa has 99 counties");
    assert!(insert_store(1, 0).is_err());
    assert!(insert_store(2, 99).is_ok());

    client
        .execute_script(
            "liquor_it",
            "INSERT INTO dim_date (date, year, quarter, month, day, day_of_week, is_weekend) \
             VALUES ('2025-12-31', 2025, 4, 12, 31, 3, false);
             INSERT INTO dim_store (store_number, county_number) VALUES (2633, 77);
             INSERT INTO dim_product (item_number, pack, bottle_volume_ml) VALUES (36308, 12, 750);
             INSERT INTO dim_vendor (vendor_number, vendor_name) VALUES (65, 'JIM BEAM');",
        )
        .expect("dimension rows");
    let fact = |invoice: &str, year: i32, bottles: i32| {
        client.query(
            "liquor_it",
            &format!(
                "INSERT INTO fact_sales (date_key, year, store_key, product_key, vendor_key, \
                 invoice_item_number, state_bottle_cost, state_bottle_retail, bottles_sold, \
                 sale_dollars, volume_sold_liters, volume_sold_gallons) \
                 SELECT d.date_key, {year}, s.store_key, p.product_key, v.vendor_key, \
                 '{invoice}', 10, 15, {bottles}, 180, 9, 2.38 \
                 FROM dim_date d, dim_store s, dim_product p, dim_vendor v \
                 WHERE s.store_number = 2633"
            ),
        )
    };
    assert!(fact("INV-1", 2025, 12).is_ok());
    assert!(fact("INV-2", 2026, 12).is_err(), "no partition past 2025");
    assert!(fact("INV-3", 2011, 12).is_err(), "no partition before 2012");
    assert!(fact("INV-4", 2025, 0).is_err(), "bottles_sold must be positive");

    assert!(matches!(
        schema.apply(SchemaMode::Create),
        Err(SchemaError::AlreadyExists { .. })
    ));
    assert!(!schema.ensure().expect("ensure"));
}

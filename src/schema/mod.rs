//! Star schema for the sample dataset.
//!
//! Creation refuses to touch existing tables unless asked to recreate them,
//! and requires PostGIS because the store dimension carries a geometry column.

mod ddl;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::postgres::{Client, CommandRunner, PostgresError};

pub use ddl::{
    create_sql, drop_sql, partition_name, populate_sql, DIMENSION_TABLES, FACT_TABLE,
    FIRST_PARTITION_YEAR, LAST_PARTITION_YEAR,
};

/// What `schema` should do about existing tables.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SchemaMode {
    /// Create; refuse if any star table exists.
    #[default]
    Create,
    /// Only report existing tables.
    Check,
    /// Drop existing star tables, then create.
    Force,
}

/// Result of [`StarSchema::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SchemaOutcome {
    /// Tables were created.
    Created {
        /// Tables dropped first (`Force` only).
        dropped: Vec<String>,
    },
    /// `Check` found these tables; nothing was changed.
    Existing {
        /// Existing star tables.
        tables: Vec<String>,
    },
}

/// Row counts after population.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StarCounts {
    /// `dim_date`
    pub dates: u64,
    /// `dim_store`
    pub stores: u64,
    /// `dim_product`
    pub products: u64,
    /// `dim_vendor`
    pub vendors: u64,
    /// `fact_sales`
    pub facts: u64,
}

/// Manages the star schema in one database.
pub struct StarSchema<'c, 'a, R: CommandRunner> {
    client: &'c Client<'a, R>,
    database: &'c str,
}

impl<'c, 'a, R: CommandRunner> StarSchema<'c, 'a, R> {
    /// Schema in `database`, reached through `client`.
    pub fn new(client: &'c Client<'a, R>, database: &'c str) -> Self {
        Self { client, database }
    }

    /// Star tables already present, partitions included.
    pub fn existing_tables(&self) -> Result<Vec<String>, SchemaError> {
        self.client
            .query(self.database, ddl::EXISTING_TABLES_SQL)
            .map_err(|source| SchemaError::Step {
                step: "list existing tables",
                source,
            })
    }

    /// Whether the server ships the PostGIS extension.
    pub fn postgis_available(&self) -> Result<bool, SchemaError> {
        let rows = self
            .client
            .query(self.database, ddl::POSTGIS_AVAILABLE_SQL)
            .map_err(|source| SchemaError::Step {
                step: "check PostGIS",
                source,
            })?;
        Ok(rows.first().is_some_and(|row| row == "t"))
    }

    /// Creates, checks or recreates the schema according to `mode`.
    pub fn apply(&self, mode: SchemaMode) -> Result<SchemaOutcome, SchemaError> {
        let existing = self.existing_tables()?;
        let mut dropped = Vec::new();
        match mode {
            SchemaMode::Check => return Ok(SchemaOutcome::Existing { tables: existing }),
            SchemaMode::Create if !existing.is_empty() => {
                return Err(SchemaError::AlreadyExists { tables: existing });
            }
            SchemaMode::Create => {}
            SchemaMode::Force if existing.is_empty() => {}
            SchemaMode::Force => {
                let partitions: Vec<String> = existing
                    .iter()
                    .filter(|t| t.starts_with(&format!("{FACT_TABLE}_")))
                    .cloned()
                    .collect();
                info!(count = existing.len(), "dropping existing star schema");
                self.run("drop existing tables", &drop_sql(&partitions))?;
                dropped = existing;
            }
        }

        if !self.postgis_available()? {
            return Err(SchemaError::PostgisUnavailable);
        }
        self.run("enable PostGIS", ddl::ENABLE_POSTGIS_SQL)?;
        self.run("create schema", &create_sql())?;
        info!(database = self.database, "star schema created");
        Ok(SchemaOutcome::Created { dropped })
    }

    /// Creates the schema unless it is already there.
    pub fn ensure(&self) -> Result<bool, SchemaError> {
        if !self.existing_tables()?.is_empty() {
            return Ok(false);
        }
        self.apply(SchemaMode::Create)?;
        Ok(true)
    }

    /// Fills the star tables from the staging table.
    pub fn populate(&self) -> Result<StarCounts, SchemaError> {
        self.run("populate star schema", &populate_sql())?;
        let rows = self
            .client
            .query(self.database, ddl::COUNTS_SQL)
            .map_err(|source| SchemaError::Step {
                step: "count star rows",
                source,
            })?;
        let counts = parse_counts(&rows);
        info!(facts = counts.facts, "star schema populated");
        Ok(counts)
    }

    fn run(&self, step: &'static str, sql: &str) -> Result<(), SchemaError> {
        self.client
            .execute_script(self.database, sql)
            .map(|_| ())
            .map_err(|source| SchemaError::Step { step, source })
    }
}

fn parse_counts(rows: &[String]) -> StarCounts {
    let mut counts = StarCounts::default();
    for row in rows {
        let Some((table, count)) = row.split_once('|') else {
            continue;
        };
        let count = count.trim().parse().unwrap_or(0);
        match table {
            "dim_date" => counts.dates = count,
            "dim_store" => counts.stores = count,
            "dim_product" => counts.products = count,
            "dim_vendor" => counts.vendors = count,
            "fact_sales" => counts.facts = count,
            _ => {}
        }
    }
    counts
}

/// Star-schema failures.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// `pg_available_extensions` has no `postgis`.
    #[error("PostGIS extension is not available; install PostGIS first")]
    PostgisUnavailable,
    /// Tables exist and neither `--force` nor `--check` was given.
    #[error("schema already exists ({}); use --force to recreate or --check to list", tables.join(", "))]
    AlreadyExists {
        /// Existing tables.
        tables: Vec<String>,
    },
    /// A SQL step failed.
    #[error("failed to {step}: {source}")]
    Step {
        /// Step description.
        step: &'static str,
        /// Underlying failure.
        source: PostgresError,
    },
}

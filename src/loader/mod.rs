//! One-shot loader for the Iowa liquor sales CSV.
//!
//! The CSV is bulk-loaded into a flat staging table, dates are normalized,
//! indexes are built and a fixed battery of inspection queries is run. The
//! queries only produce output for a person to read.

mod sql;

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;
use time::macros::format_description;
use time::Date;
use tracing::{debug, info};

use crate::config::Environment;
use crate::error::{Error, Result};
use crate::postgres::{Client, CommandRunner, PostgresError};
use crate::schema::{StarCounts, StarSchema};
use crate::settings::Settings;

pub use sql::{load_steps, SqlStep, ValidationQuery, VALIDATIONS};

/// Flat table the CSV is loaded into.
pub const STAGING_TABLE: &str = "liquor_sales_staging";
/// Variable naming the CSV to load.
pub const CSV_ENV: &str = "IOWA_LIQUOR_CSV";
/// CSV used when nothing else is configured, relative to the project root.
pub const DEFAULT_CSV: &str = "iowa_liquor_sales.csv";

/// Header of the published dataset, in file order.
pub const EXPECTED_COLUMNS: [&str; 24] = [
    "Invoice/Item Number",
    "Date",
    "Store Number",
    "Store Name",
    "Address",
    "City",
    "Zip Code",
    "Store Location",
    "County Number",
    "County",
    "Category",
    "Category Name",
    "Vendor Number",
    "Vendor Name",
    "Item Number",
    "Item Description",
    "Pack",
    "Bottle Volume (ml)",
    "State Bottle Cost",
    "State Bottle Retail",
    "Bottles Sold",
    "Sale (Dollars)",
    "Volume Sold (Liters)",
    "Volume Sold (Gallons)",
];

/// Picks the CSV: `--csv`, then `IOWA_LIQUOR_CSV`, then the settings file,
/// then the default name. Relative paths are taken from the project root.
pub fn resolve_csv_path(explicit: Option<&Path>, env: &Environment, settings: &Settings) -> PathBuf {
    let chosen = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.var(CSV_ENV).map(PathBuf::from))
        .or_else(|| settings.loader.csv_path.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CSV));
    if chosen.is_absolute() {
        chosen
    } else {
        env.project_root().join(chosen)
    }
}

/// What the header check found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsvSummary {
    /// Checked file.
    pub path: PathBuf,
    /// Date of the first data row, if there is one.
    pub first_date: Option<String>,
}

/// Checks the header and the first row's date before any SQL runs.
pub fn inspect_csv(path: &Path) -> std::result::Result<CsvSummary, LoaderError> {
    let csv_err = |source: csv::Error| LoaderError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let headers = reader.headers().map_err(csv_err)?.clone();
    let found: Vec<&str> = headers.iter().map(str::trim).collect();
    let missing: Vec<String> = EXPECTED_COLUMNS
        .iter()
        .filter(|column| !found.contains(column))
        .map(|column| (*column).to_string())
        .collect();
    if !missing.is_empty() || found.len() != EXPECTED_COLUMNS.len() {
        return Err(LoaderError::Header {
            path: path.to_path_buf(),
            missing,
            found: found.len(),
        });
    }

    let date_index = found.iter().position(|c| *c == "Date").unwrap_or(1);
    let first_date = match reader.records().next() {
        Some(record) => {
            let record = record.map_err(csv_err)?;
            let raw = record.get(date_index).unwrap_or("").trim().to_string();
            parse_sale_date(&raw).ok_or_else(|| LoaderError::Date {
                path: path.to_path_buf(),
                value: raw.clone(),
            })?;
            Some(raw)
        }
        None => None,
    };
    Ok(CsvSummary {
        path: path.to_path_buf(),
        first_date,
    })
}

/// Parses a month/day/year sale date.
pub fn parse_sale_date(raw: &str) -> Option<Date> {
    let format = format_description!("[month padding:none]/[day padding:none]/[year]");
    Date::parse(raw.trim(), format).ok()
}

/// Output of one inspection query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    /// Query heading.
    pub title: String,
    /// Result rows, `|`-separated columns.
    pub rows: Vec<String>,
}

/// Everything `populate` produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// Loaded file.
    pub csv: PathBuf,
    /// Target database.
    pub database: String,
    /// Whether the database had to be created first.
    pub database_created: bool,
    /// Inspection query output, in order.
    pub validations: Vec<Validation>,
    /// Star-schema counts when `--star` was requested.
    pub star: Option<StarCounts>,
}

impl LoadReport {
    /// Rows of the inspection query titled `title`.
    pub fn validation(&self, title: &str) -> Option<&[String]> {
        self.validations
            .iter()
            .find(|v| v.title == title)
            .map(|v| v.rows.as_slice())
    }
}

/// Runs the load pipeline against one database.
pub struct Loader<'c, 'a, R: CommandRunner> {
    client: &'c Client<'a, R>,
    database: &'c str,
    star: bool,
}

impl<'c, 'a, R: CommandRunner> Loader<'c, 'a, R> {
    /// Loader for `database`.
    pub fn new(client: &'c Client<'a, R>, database: &'c str) -> Self {
        Self {
            client,
            database,
            star: false,
        }
    }

    /// Also populate the star schema after staging.
    pub fn with_star(mut self, star: bool) -> Self {
        self.star = star;
        self
    }

    /// Loads `csv`. A missing file fails before any SQL runs; temp scripts are
    /// removed whether the load succeeds or not.
    pub fn load(&self, csv: &Path) -> Result<LoadReport> {
        if !csv.is_file() {
            return Err(Error::missing_input(csv));
        }
        let summary = inspect_csv(csv)?;
        debug!(first_date = ?summary.first_date, "csv header ok");

        let database_created = self
            .client
            .ensure_database(self.database)
            .map_err(|source| LoaderError::Step {
                step: "create database",
                source,
            })?;

        let scripts = TempDir::new().map_err(LoaderError::Scratch)?;
        let csv = fs::canonicalize(csv).unwrap_or_else(|_| csv.to_path_buf());
        for (index, step) in load_steps(&csv).iter().enumerate() {
            info!(step = step.name, "loader step");
            let script = scripts
                .path()
                .join(format!("{:02}-{}.sql", index + 1, step.name.replace(' ', "-")));
            fs::write(&script, &step.sql).map_err(LoaderError::Scratch)?;
            self.client
                .execute_file(self.database, &script)
                .map_err(|source| LoaderError::Step {
                    step: step.name,
                    source,
                })?;
        }
        drop(scripts);

        let mut validations = Vec::with_capacity(VALIDATIONS.len());
        for query in VALIDATIONS {
            let rows = self
                .client
                .query(self.database, query.sql)
                .map_err(|source| LoaderError::Step {
                    step: query.title,
                    source,
                })?;
            validations.push(Validation {
                title: query.title.to_string(),
                rows,
            });
        }

        let star = if self.star {
            let schema = StarSchema::new(self.client, self.database);
            if schema.ensure()? {
                info!("created star schema");
            }
            Some(schema.populate()?)
        } else {
            None
        };

        info!(csv = %csv.display(), database = self.database, "load finished");
        Ok(LoadReport {
            csv,
            database: self.database.to_string(),
            database_created,
            validations,
            star,
        })
    }
}

/// Loader failures.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The CSV could not be read.
    #[error("failed to read {path}: {source}")]
    Csv {
        /// CSV path.
        path: PathBuf,
        /// Reader error.
        source: csv::Error,
    },
    /// Header does not match the published dataset.
    #[error("{path} does not look like the liquor sales dataset ({found} columns, missing: {})", missing.join(", "))]
    Header {
        /// CSV path.
        path: PathBuf,
        /// Expected columns not present.
        missing: Vec<String>,
        /// Number of columns found.
        found: usize,
    },
    /// First date is not month/day/year.
    #[error("{path}: date {value:?} is not in month/day/year form")]
    Date {
        /// CSV path.
        path: PathBuf,
        /// Offending value.
        value: String,
    },
    /// Temp script directory could not be used.
    #[error("failed to prepare loader scripts: {0}")]
    Scratch(#[source] std::io::Error),
    /// A SQL step failed.
    #[error("loader step '{step}' failed: {source}")]
    Step {
        /// Step name.
        step: &'static str,
        /// Underlying failure.
        source: PostgresError,
    },
}

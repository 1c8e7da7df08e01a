//! Crate-level error type.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::ConfigError;
use crate::fetch::FetchError;
use crate::loader::LoaderError;
use crate::postgres::{PostgresError, SetupStep};
use crate::schema::SchemaError;
use crate::settings::SettingsError;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error returned by every user-facing operation.
///
/// Each variant names the stage that failed so the CLI can print a message
/// such as `failed to initialize PostgreSQL: ...` without a separate lookup.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection record could not be loaded, prompted or saved.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Tool settings file is unreadable or malformed.
    #[error(transparent)]
    Settings(#[from] SettingsError),
    /// A single lifecycle operation failed outside of `setup`.
    #[error(transparent)]
    Postgres(#[from] PostgresError),
    /// A step of the composite `setup` sequence failed.
    #[error("{step}: {source}")]
    Setup {
        /// Step that short-circuited the sequence.
        step: SetupStep,
        /// Underlying lifecycle failure.
        #[source]
        source: PostgresError,
    },
    /// An interactive download failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
    /// Dataset loader failure.
    #[error(transparent)]
    Loader(#[from] LoaderError),
    /// Star-schema management failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),
    /// A required input file does not exist.
    #[error("file not found: {0}")]
    MissingInput(PathBuf),
    /// Log filter could not be installed.
    #[error("invalid log configuration: {0}")]
    Logging(String),
    /// Plain I/O error.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn missing_input(path: impl AsRef<Path>) -> Self {
        Error::MissingInput(path.as_ref().to_path_buf())
    }
}

//! PostgreSQL lifecycle management.
//!
//! Everything here sequences the stock PostgreSQL binaries. Commands go
//! through [`CommandRunner`] so the sequencing can be exercised without a
//! server, and the cluster's lifecycle is tracked as an explicit
//! [`ClusterState`] persisted next to the data directory.

mod client;
mod cluster;
mod runner;
mod state;
mod toolchain;

use std::fmt;
use std::io;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

pub use client::Client;
pub use cluster::{Cluster, SetupReport};
pub use runner::{CommandOutput, CommandRunner, Invocation, SystemRunner};
pub use state::{ClusterState, StateRecord};
pub use toolchain::Toolchain;

#[cfg(test)]
pub(crate) use runner::testing;

/// Steps of the composite `setup` sequence, in order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupStep {
    /// Fresh data directory and `initdb`.
    Initialize,
    /// Server configuration file.
    Configure,
    /// `pg_ctl start`.
    Start,
    /// Target database creation.
    EnsureDatabase,
    /// `pg_ctl stop`.
    Stop,
}

impl fmt::Display for SetupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SetupStep::Initialize => "failed to initialize PostgreSQL",
            SetupStep::Configure => "failed to configure PostgreSQL",
            SetupStep::Start => "failed to start PostgreSQL",
            SetupStep::EnsureDatabase => "failed to create database",
            SetupStep::Stop => "failed to stop PostgreSQL",
        };
        f.write_str(text)
    }
}

/// Failure of a single lifecycle operation.
#[derive(Debug, Error)]
pub enum PostgresError {
    /// A PostgreSQL binary is not on `PATH`.
    #[error("{tool} not found on PATH: {source}")]
    ToolNotFound {
        /// Binary name.
        tool: &'static str,
        /// Lookup failure.
        source: which::Error,
    },
    /// The binary could not be launched.
    #[error("failed to run {tool}: {source}")]
    Spawn {
        /// Binary name.
        tool: String,
        /// Launch failure.
        source: io::Error,
    },
    /// The binary ran and exited non-zero.
    #[error("{tool} exited with {}: {}", display_status(.status), .stderr.trim())]
    Command {
        /// Binary name.
        tool: String,
        /// Exit code, `None` if killed by a signal.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Filesystem preparation failed.
    #[error("failed to prepare {path}: {source}")]
    Filesystem {
        /// Path being prepared.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
    /// The persisted state record could not be read or written.
    #[error("cluster state file {path}: {message}")]
    StateFile {
        /// State file path.
        path: PathBuf,
        /// What went wrong.
        message: String,
    },
}

impl PostgresError {
    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PostgresError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

fn display_status(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

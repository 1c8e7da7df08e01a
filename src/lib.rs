//! Local PostgreSQL + Metabase development environment.
//!
//! `pgstack` resolves a connection record (from disk or an interactive
//! wizard), drives the stock PostgreSQL binaries through an explicit cluster
//! lifecycle, fetches the environment's helper resources and loads the Iowa
//! liquor sales sample dataset into a staging table and a star schema.

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod logging;
pub mod postgres;
pub mod schema;
pub mod settings;
pub mod shell;
pub mod wizard;

pub use error::{Error, Result};

//! Log subscriber installation.

use std::fmt as std_fmt;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

use crate::config::{parse_flag, ConfigKey, Environment};
use crate::error::{Error, Result};

/// Variable holding an `EnvFilter` directive for pgstack's own logs.
pub const LOG_ENV: &str = "PGSTACK_LOG";

/// Filter used when `PGSTACK_LOG` is unset.
pub fn default_directive(debug: bool) -> &'static str {
    if debug {
        "debug"
    } else {
        "info"
    }
}

/// Directive for this process: `PGSTACK_LOG` if set, otherwise the
/// level implied by `PG_DEBUG`.
pub fn directive_for(env: &Environment) -> String {
    if let Some(directive) = env.var(LOG_ENV) {
        return directive.to_string();
    }
    default_directive(env_debug(env)).to_string()
}

/// Directive to switch to once the connection record is known, if any.
///
/// A saved `PG_DEBUG=true` raises the level unless `PGSTACK_LOG` pinned it
/// or the environment already asked for debug.
pub fn escalated_directive(env: &Environment, config_debug: bool) -> Option<&'static str> {
    if !config_debug || env.var(LOG_ENV).is_some() || env_debug(env) {
        return None;
    }
    Some(default_directive(true))
}

fn env_debug(env: &Environment) -> bool {
    env.var(ConfigKey::Debug.as_str())
        .and_then(|raw| parse_flag(raw).ok())
        .unwrap_or(false)
}

fn parse_filter(directive: &str) -> Result<EnvFilter> {
    EnvFilter::try_new(directive)
        .map_err(|e| Error::Logging(format!("invalid log filter {directive:?}: {e}")))
}

/// Changes the active filter after installation.
pub struct LogHandle {
    filter: reload::Handle<EnvFilter, Registry>,
}

impl LogHandle {
    /// Replaces the filter. A no-op when another subscriber won the install.
    pub fn set_directive(&self, directive: &str) -> Result<()> {
        let filter = parse_filter(directive)?;
        match self.filter.reload(filter) {
            Ok(()) => Ok(()),
            Err(err) if err.is_dropped() => Ok(()),
            Err(err) => Err(Error::Logging(err.to_string())),
        }
    }

    /// Applies [`escalated_directive`] for a freshly resolved record.
    pub fn follow_config(&self, env: &Environment, config_debug: bool) -> Result<()> {
        match escalated_directive(env, config_debug) {
            Some(directive) => {
                self.set_directive(directive)?;
                tracing::debug!("debug logging enabled by saved configuration");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl std_fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut std_fmt::Formatter<'_>) -> std_fmt::Result {
        f.debug_struct("LogHandle").finish_non_exhaustive()
    }
}

/// Installs the global subscriber, writing to stderr so stdout can be
/// `eval`ed. A second call leaves the first subscriber in place.
pub fn init_logging(directive: &str) -> Result<LogHandle> {
    let (filter, handle) = reload::Layer::new(parse_filter(directive)?);
    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("logging already initialized");
    }
    Ok(LogHandle { filter: handle })
}

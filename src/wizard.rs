//! First-run configuration wizard.
//!
//! The question sequence lives here once; how a question is shown (styled
//! terminal, scripted answers, silent defaults) is up to the [`Prompter`].

use std::io;
use std::path::PathBuf;

use crate::config::{parse_port, ConfigError, ConnectionConfig};

const MAX_PORT_ATTEMPTS: usize = 3;

/// Answers the wizard's questions.
///
/// Implementations return the raw answer; empty input is mapped to the
/// default by the wizard, not by the prompter.
pub trait Prompter {
    /// Shows a header before the first question. Cosmetic.
    fn banner(&mut self, _title: &str) {}

    /// Yes/no question.
    fn confirm(&mut self, question: &str, default: bool) -> io::Result<bool>;

    /// Free-form input with `default` offered as a suggestion.
    fn input(&mut self, label: &str, default: &str) -> io::Result<String>;

    /// Masked input.
    fn password(&mut self, label: &str, default: &str) -> io::Result<String>;
}

/// Prompter that takes every default without asking; used for
/// non-interactive activation.
#[derive(Debug, Default, Clone, Copy)]
pub struct AcceptDefaults;

impl Prompter for AcceptDefaults {
    fn confirm(&mut self, _question: &str, default: bool) -> io::Result<bool> {
        Ok(default)
    }

    fn input(&mut self, _label: &str, default: &str) -> io::Result<String> {
        Ok(default.to_string())
    }

    fn password(&mut self, _label: &str, default: &str) -> io::Result<String> {
        Ok(default.to_string())
    }
}

/// Runs the question sequence and returns a complete record.
pub fn run<P: Prompter + ?Sized>(
    prompter: &mut P,
    defaults: &ConnectionConfig,
) -> Result<ConnectionConfig, ConfigError> {
    prompter.banner("PostgreSQL configuration");

    let customize = prompter
        .confirm("Customize the PostgreSQL configuration?", false)
        .map_err(ConfigError::Prompt)?;
    if !customize {
        return Ok(defaults.clone());
    }

    let host = ask(prompter, "Host address", &defaults.host)?;
    let port = ask_port(prompter, defaults.port)?;
    let user = ask(prompter, "Username", &defaults.user)?;
    let password = prompter
        .password("Password", &defaults.password)
        .map(|answer| or_default(answer, &defaults.password))
        .map_err(ConfigError::Prompt)?;
    let database = ask(prompter, "Database name", &defaults.database)?;

    let default_dir = defaults.base_dir.display().to_string();
    let keep_dir = prompter
        .confirm(
            &format!("Use the default data directory ({default_dir})?"),
            true,
        )
        .map_err(ConfigError::Prompt)?;
    let base_dir = if keep_dir {
        defaults.base_dir.clone()
    } else {
        expand_home(&ask(prompter, "Data directory", &default_dir)?)
    };

    Ok(ConnectionConfig {
        host,
        port,
        user,
        password,
        database,
        base_dir,
        debug: defaults.debug,
    })
}

fn ask<P: Prompter + ?Sized>(
    prompter: &mut P,
    label: &str,
    default: &str,
) -> Result<String, ConfigError> {
    prompter
        .input(label, default)
        .map(|answer| or_default(answer, default))
        .map_err(ConfigError::Prompt)
}

fn ask_port<P: Prompter + ?Sized>(prompter: &mut P, default: u16) -> Result<u16, ConfigError> {
    let default_text = default.to_string();
    let mut last_err = None;
    for _ in 0..MAX_PORT_ATTEMPTS {
        let answer = ask(prompter, "Port", &default_text)?;
        match parse_port(&answer) {
            Ok(port) => return Ok(port),
            Err(err) => {
                tracing::warn!(value = %answer, "port must be a number between 1 and 65535");
                last_err = Some(err);
            }
        }
    }
    Err(last_err.unwrap_or(ConfigError::Prompt(io::Error::new(
        io::ErrorKind::InvalidInput,
        "no port given",
    ))))
}

fn or_default(answer: String, default: &str) -> String {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

fn expand_home(raw: &str) -> PathBuf {
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Prompter replaying canned answers, for tests.
#[cfg(test)]
pub(crate) struct ScriptedPrompter {
    answers: std::collections::VecDeque<String>,
    pub(crate) asked: Vec<String>,
}

#[cfg(test)]
impl ScriptedPrompter {
    pub(crate) fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            asked: Vec::new(),
        }
    }

    fn next(&mut self, label: &str) -> io::Result<String> {
        self.asked.push(label.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "script exhausted"))
    }
}

#[cfg(test)]
impl Prompter for ScriptedPrompter {
    fn confirm(&mut self, question: &str, default: bool) -> io::Result<bool> {
        let answer = self.next(question)?;
        Ok(match answer.trim().to_ascii_lowercase().as_str() {
            "" => default,
            "y" | "yes" => true,
            _ => false,
        })
    }

    fn input(&mut self, label: &str, _default: &str) -> io::Result<String> {
        self.next(label)
    }

    fn password(&mut self, label: &str, _default: &str) -> io::Result<String> {
        self.next(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;

    fn defaults() -> ConnectionConfig {
        ConnectionConfig::defaults(&Environment::new("/p", "/p/.flox/cache"))
    }

    #[test]
    fn declining_keeps_every_default() {
        let mut prompter = ScriptedPrompter::new(["n"]);
        let config = run(&mut prompter, &defaults()).unwrap();
        assert_eq!(config, defaults());
        assert_eq!(prompter.asked.len(), 1);
    }

    #[test]
    fn customized_answers_with_blank_fallbacks() {
        let mut prompter = ScriptedPrompter::new([
            "y",
            "0.0.0.0",
            "",
            "admin",
            "s3cret",
            "",
            "n",
            "/srv/pg",
        ]);
        let config = run(&mut prompter, &defaults()).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 15432);
        assert_eq!(config.user, "admin");
        assert_eq!(config.password, "s3cret");
        assert_eq!(config.database, "iowa_liquor_sales");
        assert_eq!(config.base_dir, PathBuf::from("/srv/pg"));
        assert_eq!(
            prompter.asked,
            vec![
                "Customize the PostgreSQL configuration?",
                "Host address",
                "Port",
                "Username",
                "Password",
                "Database name",
                "Use the default data directory (/p/.flox/cache/postgres)?",
                "Data directory",
            ]
        );
    }

    #[test]
    fn invalid_port_is_asked_again() {
        let mut prompter =
            ScriptedPrompter::new(["y", "", "not-a-port", "5440", "", "", "", "y"]);
        let config = run(&mut prompter, &defaults()).unwrap();
        assert_eq!(config.port, 5440);
        assert_eq!(config.base_dir, defaults().base_dir);
    }

    #[test]
    fn repeated_bad_ports_give_up() {
        let mut prompter = ScriptedPrompter::new(["y", "", "x", "y", "z"]);
        let err = run(&mut prompter, &defaults()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn exhausted_input_surfaces_prompt_error() {
        let mut prompter = ScriptedPrompter::new(["y", "localhost"]);
        let err = run(&mut prompter, &defaults()).unwrap_err();
        assert!(matches!(err, ConfigError::Prompt(_)));
    }
}

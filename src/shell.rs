//! Export statements for the shells the environment supports.

use std::fmt;
use std::fmt::Write as _;

use clap::ValueEnum;

use crate::config::shell_quote;

/// Target shell for `env` and `activate` output.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum Shell {
    /// POSIX-style `export`.
    #[default]
    Bash,
    /// Same syntax as bash.
    Zsh,
    /// `set -gx`.
    Fish,
}

impl Shell {
    /// One statement binding `key` to `value`.
    pub fn export(self, key: &str, value: &str) -> String {
        match self {
            Shell::Bash | Shell::Zsh => format!("export {key}={};", shell_quote(value)),
            Shell::Fish => format!("set -gx {key} {};", fish_quote(value)),
        }
    }

    /// Statements for every pair, one per line.
    pub fn render<'a, I>(self, vars: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut out = String::new();
        for (key, value) in vars {
            let _ = writeln!(out, "{}", self.export(key, value));
        }
        out
    }
}

impl fmt::Display for Shell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shell::Bash => "bash",
            Shell::Zsh => "zsh",
            Shell::Fish => "fish",
        })
    }
}

// fish single quotes only treat \\ and \' specially
fn fish_quote(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

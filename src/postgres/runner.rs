use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::PostgresError;

/// A fully specified external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    /// Binary to execute.
    pub program: PathBuf,
    /// Arguments, passed without a shell.
    pub args: Vec<OsString>,
    /// Extra environment for the child only.
    pub env: Vec<(String, String)>,
    /// Variables removed from the child's inherited environment.
    pub env_remove: Vec<String>,
}

impl Invocation {
    /// Invocation of `program` with no arguments.
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
            env_remove: Vec::new(),
        }
    }

    /// Appends one argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets a child environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Clears an inherited variable in the child.
    pub fn env_remove(mut self, key: impl Into<String>) -> Self {
        self.env_remove.push(key.into());
        self
    }

    /// File name of the program, for messages.
    pub fn tool_name(&self) -> String {
        self.program
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    /// Whether `arg` appears verbatim among the arguments.
    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Value following `flag`, if any.
    pub fn arg_after(&self, flag: &str) -> Option<&Path> {
        self.args
            .iter()
            .position(|a| a == flag)
            .and_then(|idx| self.args.get(idx + 1))
            .map(Path::new)
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal.
    pub status: Option<i32>,
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Zero exit status.
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Executes invocations. Blocks until the command exits.
pub trait CommandRunner {
    /// Runs `invocation` to completion.
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;

    /// Like [`run`](Self::run), but a launch failure or non-zero exit is an error.
    fn run_checked(&self, invocation: &Invocation) -> Result<CommandOutput, PostgresError> {
        let output = self.run(invocation).map_err(|source| PostgresError::Spawn {
            tool: invocation.tool_name(),
            source,
        })?;
        if !output.success() {
            return Err(PostgresError::Command {
                tool: invocation.tool_name(),
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        (**self).run(invocation)
    }
}

/// Runner backed by `std::process::Command`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        debug!(
            program = %invocation.program.display(),
            args = ?invocation.args,
            "running command"
        );
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args);
        for key in &invocation.env_remove {
            command.env_remove(key);
        }
        for (key, value) in &invocation.env {
            command.env(key, value);
        }
        let output = command.output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

//! Interactive answers for the configuration wizard.

use std::io::{self, BufRead, IsTerminal, Write};

use nu_ansi_term::{Color, Style};
use pgstack::wizard::{AcceptDefaults, Prompter};

/// Prompter chosen for this run.
pub enum CliPrompter {
    Terminal(TerminalPrompter),
    Defaults(AcceptDefaults),
}

impl CliPrompter {
    /// Terminal questions unless `--defaults` was given or stdin is not a
    /// terminal.
    pub fn select(accept_defaults: bool, paint: bool) -> Self {
        if accept_defaults || !io::stdin().is_terminal() {
            CliPrompter::Defaults(AcceptDefaults)
        } else {
            CliPrompter::Terminal(TerminalPrompter::new(paint))
        }
    }

    fn inner(&mut self) -> &mut dyn Prompter {
        match self {
            CliPrompter::Terminal(p) => p,
            CliPrompter::Defaults(p) => p,
        }
    }
}

impl Prompter for CliPrompter {
    fn banner(&mut self, title: &str) {
        self.inner().banner(title)
    }

    fn confirm(&mut self, question: &str, default: bool) -> io::Result<bool> {
        self.inner().confirm(question, default)
    }

    fn input(&mut self, label: &str, default: &str) -> io::Result<String> {
        self.inner().input(label, default)
    }

    fn password(&mut self, label: &str, default: &str) -> io::Result<String> {
        self.inner().password(label, default)
    }
}

/// Asks on stderr and reads stdin, keeping stdout free for exports.
pub struct TerminalPrompter {
    header: Style,
    label: Style,
    hint: Style,
}

impl TerminalPrompter {
    pub fn new(paint: bool) -> Self {
        if paint {
            Self {
                header: Style::new().fg(Color::Cyan).bold(),
                label: Style::new().bold(),
                hint: Style::new().fg(Color::DarkGray),
            }
        } else {
            Self {
                header: Style::new(),
                label: Style::new(),
                hint: Style::new(),
            }
        }
    }

    fn ask(&self, label: &str, hint: &str) -> io::Result<()> {
        let mut err = io::stderr().lock();
        write!(err, "{} {} ", self.label.paint(label), self.hint.paint(hint))?;
        err.flush()
    }
}

impl Prompter for TerminalPrompter {
    fn banner(&mut self, title: &str) {
        let rule = "─".repeat(title.chars().count() + 4);
        // clear screen, cursor home
        eprint!("\x1b[2J\x1b[H");
        eprintln!("{}", self.header.paint(format!("╭{rule}╮")));
        eprintln!("{}", self.header.paint(format!("│  {title}  │")));
        eprintln!("{}", self.header.paint(format!("╰{rule}╯")));
        eprintln!();
    }

    fn confirm(&mut self, question: &str, default: bool) -> io::Result<bool> {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        loop {
            self.ask(question, hint)?;
            match read_line()?.to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => eprintln!("{}", self.hint.paint("please answer y or n")),
            }
        }
    }

    fn input(&mut self, label: &str, default: &str) -> io::Result<String> {
        self.ask(&format!("{label}:"), &format!("[{default}]"))?;
        read_line()
    }

    fn password(&mut self, label: &str, _default: &str) -> io::Result<String> {
        self.ask(&format!("{label}:"), "[hidden, blank keeps default]")?;
        read_hidden()
    }
}

fn read_line() -> io::Result<String> {
    let mut line = String::new();
    if io::stdin().lock().read_line(&mut line)? == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "stdin closed"));
    }
    Ok(line.trim().to_string())
}

#[cfg(unix)]
fn read_hidden() -> io::Result<String> {
    use nix::sys::termios::{tcgetattr, tcsetattr, LocalFlags, SetArg};

    let stdin = io::stdin();
    let original = tcgetattr(&stdin).map_err(io::Error::from)?;
    let mut hidden = original.clone();
    hidden.local_flags.remove(LocalFlags::ECHO);
    hidden.local_flags.insert(LocalFlags::ECHONL);
    tcsetattr(&stdin, SetArg::TCSANOW, &hidden).map_err(io::Error::from)?;
    let answer = read_line();
    tcsetattr(&stdin, SetArg::TCSANOW, &original).map_err(io::Error::from)?;
    answer
}

#[cfg(not(unix))]
fn read_hidden() -> io::Result<String> {
    read_line()
}

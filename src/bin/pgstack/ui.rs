use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use nu_ansi_term::{Color, Style};
use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

/// When to paint output.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum ColorChoice {
    /// Paint when the output stream is a terminal.
    #[default]
    Auto,
    /// Always paint.
    Always,
    /// Never paint.
    Never,
}

/// Human-facing output. Machine output (exports, JSON) bypasses this.
pub struct Ui {
    palette: Palette,
    paint: bool,
    quiet: bool,
    stderr: bool,
}

impl Ui {
    /// `stderr` routes every line there, leaving stdout to be `eval`ed.
    pub fn new(color: ColorChoice, quiet: bool, stderr: bool) -> Self {
        let terminal = if stderr {
            std::io::stderr().is_terminal()
        } else {
            std::io::stdout().is_terminal()
        };
        let paint = match color {
            ColorChoice::Never => false,
            ColorChoice::Always => true,
            ColorChoice::Auto => terminal,
        } && !quiet;
        let palette = if paint {
            Palette::styled()
        } else {
            Palette::plain()
        };
        Self {
            palette,
            paint,
            quiet,
            stderr,
        }
    }

    pub fn paints(&self) -> bool {
        self.paint
    }

    /// Aligned `key: value` rows under a heading.
    pub fn section<'a, I, V>(&self, title: &str, rows: I)
    where
        I: IntoIterator<Item = (&'a str, V)>,
        V: Display,
    {
        let rows: Vec<(&str, String)> = rows
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }
        self.heading(title);
        let width = rows.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        for (key, value) in rows {
            self.out(format_args!(
                "  {} {}",
                self.palette.key.paint(format!("{key:>width$}:")),
                value
            ));
        }
    }

    /// Bulleted entries under a heading. Prints `empty` when there are none.
    pub fn list<I>(&self, title: &str, entries: I, empty: &str)
    where
        I: IntoIterator<Item = String>,
    {
        self.heading(title);
        let mut any = false;
        for entry in entries {
            any = true;
            self.out(format_args!("  {} {entry}", self.palette.bullet.paint(BULLET)));
        }
        if !any {
            self.out(format_args!("  {}", self.palette.muted.paint(empty)));
        }
    }

    /// Preformatted lines (query output) under a heading.
    pub fn block(&self, title: &str, lines: &[String]) {
        self.heading(title);
        if lines.is_empty() {
            self.out(format_args!("  {}", self.palette.muted.paint("(no rows)")));
        }
        for line in lines {
            self.out(format_args!("  {line}"));
        }
    }

    pub fn info(&self, message: &str) {
        self.line(&self.palette.info, INFO_ICON, message);
    }

    pub fn success(&self, message: &str) {
        self.line(&self.palette.success, SUCCESS_ICON, message);
    }

    /// Always goes to stderr.
    pub fn warn(&self, message: &str) {
        if self.quiet {
            eprintln!("{message}");
        } else {
            eprintln!("{} {message}", self.palette.warn.paint(WARNING_ICON));
        }
    }

    /// Starts a spinner on stderr; the guard reports how the task ended.
    pub fn task(&self, label: impl Into<String>) -> TaskGuard<'_> {
        let label = label.into();
        let pb = (!self.quiet && std::io::stderr().is_terminal()).then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(spinner_style());
            pb.set_message(label.clone());
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        });
        TaskGuard {
            ui: self,
            label,
            start: Instant::now(),
            finished: false,
            pb,
        }
    }

    fn line(&self, style: &Style, icon: &str, message: &str) {
        if self.quiet {
            self.out(format_args!("{message}"));
        } else {
            self.out(format_args!("{} {message}", style.paint(icon)));
        }
    }

    fn out(&self, line: std::fmt::Arguments<'_>) {
        if self.stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }

    fn heading(&self, title: &str) {
        if self.quiet {
            self.out(format_args!("{title}"));
        } else {
            let heading = self.palette.heading.paint(format!("{HEADING_ICON} {title}"));
            self.out(format_args!("{heading}"));
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {msg} {elapsed}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
}

pub struct TaskGuard<'a> {
    ui: &'a Ui,
    label: String,
    start: Instant,
    finished: bool,
    pb: Option<ProgressBar>,
}

impl TaskGuard<'_> {
    /// Clears the spinner and prints a success line with the elapsed time.
    pub fn finish(mut self) {
        self.finished = true;
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
        let elapsed = format_duration(self.start.elapsed());
        self.ui.success(&format!("{} ({elapsed})", self.label));
    }
}

impl Drop for TaskGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(pb) = self.pb.take() {
            pb.finish_and_clear();
        }
        let elapsed = format_duration(self.start.elapsed());
        self.ui.warn(&format!("{} failed after {elapsed}", self.label));
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.as_secs_f64() >= 1.0 {
        format!("{:.2}s", duration.as_secs_f64())
    } else {
        format!("{:.0}ms", duration.as_secs_f64() * 1_000.0)
    }
}

struct Palette {
    heading: Style,
    key: Style,
    bullet: Style,
    muted: Style,
    info: Style,
    success: Style,
    warn: Style,
}

impl Palette {
    fn styled() -> Self {
        Self {
            heading: Style::new().fg(Color::Cyan).bold(),
            key: Style::new().fg(Color::LightBlue).bold(),
            bullet: Style::new().fg(Color::LightBlue),
            muted: Style::new().fg(Color::DarkGray),
            info: Style::new().fg(Color::LightCyan),
            success: Style::new().fg(Color::LightGreen).bold(),
            warn: Style::new().fg(Color::Yellow).bold(),
        }
    }

    fn plain() -> Self {
        Self {
            heading: Style::new(),
            key: Style::new(),
            bullet: Style::new(),
            muted: Style::new(),
            info: Style::new(),
            success: Style::new(),
            warn: Style::new(),
        }
    }
}

const HEADING_ICON: &str = "▸";
const SUCCESS_ICON: &str = "✔";
const WARNING_ICON: &str = "⚠";
const INFO_ICON: &str = "ℹ";
const BULLET: &str = "•";

//! Helper resources fetched into the project on activation.
//!
//! Downloads are best effort: a missing README or script degrades the
//! environment but never blocks the database from coming up, so failures are
//! collected into a [`FetchReport`] instead of being returned as errors.

mod download;

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::postgres::{CommandRunner, Invocation};

pub use download::{download, DownloadOutcome};

/// Files every environment expects, relative to the project root.
pub const RESOURCE_FILES: [&str; 5] = [
    "README.md",
    "resources/schema.sql",
    "resources/populate.sh",
    "resources/import.py",
    "resources/schema-creation.py",
];

/// Supported download programs, in order of preference.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadTool {
    /// `curl -fsSL -o <dest> <url>`
    Curl,
    /// `wget -q -O <dest> <url>`
    Wget,
}

impl DownloadTool {
    /// Preference order.
    pub const ALL: [DownloadTool; 2] = [DownloadTool::Curl, DownloadTool::Wget];

    /// Binary name on `PATH`.
    pub fn binary(self) -> &'static str {
        match self {
            DownloadTool::Curl => "curl",
            DownloadTool::Wget => "wget",
        }
    }
}

impl fmt::Display for DownloadTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// A resolved download program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloader {
    tool: DownloadTool,
    program: PathBuf,
}

impl Downloader {
    /// Downloader running `program` with `tool`'s argument conventions.
    pub fn new(tool: DownloadTool, program: impl Into<PathBuf>) -> Self {
        Self {
            tool,
            program: program.into(),
        }
    }

    /// Every supported tool found on `PATH`, preferred first.
    pub fn discover() -> Vec<Self> {
        DownloadTool::ALL
            .into_iter()
            .filter_map(|tool| match which::which(tool.binary()) {
                Ok(program) => Some(Self::new(tool, program)),
                Err(err) => {
                    debug!(%tool, error = %err, "download tool not available");
                    None
                }
            })
            .collect()
    }

    /// Which convention this downloader follows.
    pub fn tool(&self) -> DownloadTool {
        self.tool
    }

    /// Command fetching `url` into `dest`.
    pub fn invocation(&self, url: &str, dest: &Path) -> Invocation {
        let dest = dest.as_os_str().to_os_string();
        match self.tool {
            DownloadTool::Curl => Invocation::new(&self.program)
                .arg("-fsSL")
                .arg("-o")
                .arg(dest)
                .arg(url),
            DownloadTool::Wget => Invocation::new(&self.program)
                .arg("-q")
                .arg("-O")
                .arg(dest)
                .arg(url),
        }
    }
}

/// What happened to one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FetchOutcome {
    /// Already on disk; left alone.
    Present,
    /// Downloaded with the named tool.
    Downloaded {
        /// Tool that succeeded.
        tool: DownloadTool,
    },
    /// Every attempt failed.
    Failed {
        /// Last failure, for display.
        reason: String,
    },
}

/// One line of a [`FetchReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchEntry {
    /// Path relative to the project root.
    pub file: String,
    /// Result.
    #[serde(flatten)]
    pub outcome: FetchOutcome,
}

/// Per-file results of [`ResourceFetcher::fetch_missing`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchReport {
    /// One entry per resource, in list order.
    pub entries: Vec<FetchEntry>,
}

impl FetchReport {
    /// Files downloaded during this run.
    pub fn downloaded(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|e| matches!(e.outcome, FetchOutcome::Downloaded { .. }))
            .map(|e| e.file.as_str())
    }

    /// Files still missing, with the reason.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            FetchOutcome::Failed { reason } => Some((e.file.as_str(), reason.as_str())),
            _ => None,
        })
    }

    /// Whether every resource is now on disk.
    pub fn is_complete(&self) -> bool {
        self.failed().next().is_none()
    }
}

/// Fetches missing resources from a base URL.
pub struct ResourceFetcher<R: CommandRunner> {
    base_url: String,
    root: PathBuf,
    downloaders: Vec<Downloader>,
    runner: R,
}

impl<R: CommandRunner> ResourceFetcher<R> {
    /// Fetcher writing under `root`.
    pub fn new(
        base_url: impl Into<String>,
        root: impl Into<PathBuf>,
        downloaders: Vec<Downloader>,
        runner: R,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            root: root.into(),
            downloaders,
            runner,
        }
    }

    /// URL of a resource.
    pub fn url_for(&self, file: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), file)
    }

    /// Downloads every resource not already present. Never fails.
    pub fn fetch_missing(&self) -> FetchReport {
        let entries = RESOURCE_FILES
            .iter()
            .map(|file| FetchEntry {
                file: (*file).to_string(),
                outcome: self.fetch_one(file),
            })
            .collect();
        FetchReport { entries }
    }

    fn fetch_one(&self, file: &str) -> FetchOutcome {
        let dest = self.root.join(file);
        if dest.exists() {
            return FetchOutcome::Present;
        }
        if self.downloaders.is_empty() {
            let reason = FetchError::NoTool.to_string();
            warn!(file, %reason, "could not fetch resource");
            return FetchOutcome::Failed { reason };
        }
        if let Some(parent) = dest.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                warn!(file, error = %err, "could not create resource directory");
                return FetchOutcome::Failed {
                    reason: err.to_string(),
                };
            }
        }

        let url = self.url_for(file);
        let mut reason = String::new();
        for downloader in &self.downloaders {
            match self.try_download(downloader, &url, &dest) {
                Ok(()) => {
                    info!(file, tool = %downloader.tool(), "fetched resource");
                    return FetchOutcome::Downloaded {
                        tool: downloader.tool(),
                    };
                }
                Err(err) => {
                    debug!(file, tool = %downloader.tool(), error = %err, "download attempt failed");
                    reason = err.to_string();
                }
            }
        }
        warn!(file, %url, %reason, "could not fetch resource");
        FetchOutcome::Failed { reason }
    }

    fn try_download(&self, downloader: &Downloader, url: &str, dest: &Path) -> Result<(), FetchError> {
        let partial = partial_path(dest);
        let invocation = downloader.invocation(url, &partial);
        let result = self
            .runner
            .run(&invocation)
            .map_err(|source| FetchError::Spawn {
                tool: downloader.tool(),
                source,
            })
            .and_then(|output| {
                if output.success() {
                    Ok(())
                } else {
                    Err(FetchError::Failed {
                        tool: downloader.tool(),
                        status: output.status,
                        stderr: output.stderr.trim().to_string(),
                    })
                }
            })
            .and_then(|()| finish(&partial, dest));
        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }
}

/// Sibling path a download is written to before it is complete.
pub(crate) fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Moves a finished download into place, marking scripts executable.
pub(crate) fn finish(partial: &Path, dest: &Path) -> Result<(), FetchError> {
    fs::rename(partial, dest).map_err(|source| FetchError::Io {
        path: dest.to_path_buf(),
        source,
    })?;
    if dest.extension().is_some_and(|ext| ext == "sh") {
        make_executable(dest).map_err(|source| FetchError::Io {
            path: dest.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// A single download that did not complete.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Neither curl nor wget is on `PATH`.
    #[error("neither curl nor wget is available")]
    NoTool,
    /// The download program could not be launched.
    #[error("failed to run {tool}: {source}")]
    Spawn {
        /// Tool.
        tool: DownloadTool,
        /// Launch failure.
        source: io::Error,
    },
    /// The download program exited non-zero.
    #[error("{tool} exited with {}: {stderr}", exit_text(.status))]
    Failed {
        /// Tool.
        tool: DownloadTool,
        /// Exit code.
        status: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },
    /// Interrupted by the user; the partial file was removed.
    #[error("download of {0} interrupted")]
    Interrupted(PathBuf),
    /// Moving or chmod-ing the result failed.
    #[error("failed to finalize {path}: {source}")]
    Io {
        /// Destination.
        path: PathBuf,
        /// Underlying error.
        source: io::Error,
    },
}

fn exit_text(status: &Option<i32>) -> String {
    match status {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::{finish, partial_path, Downloader, FetchError};

/// How an interactive download ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// File is complete at this path.
    Completed(PathBuf),
    /// Ctrl-C arrived first; the child was killed and the partial file removed.
    Interrupted,
}

/// Downloads `url` to `dest`, racing the download against Ctrl-C.
///
/// The data is written to a `.part` sibling and only renamed into place once
/// the download program exits successfully.
pub async fn download(
    downloader: &Downloader,
    url: &str,
    dest: &Path,
) -> Result<DownloadOutcome, FetchError> {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    download_until(downloader, url, dest, interrupt).await
}

pub(crate) async fn download_until<F>(
    downloader: &Downloader,
    url: &str,
    dest: &Path,
    interrupt: F,
) -> Result<DownloadOutcome, FetchError>
where
    F: std::future::Future<Output = ()>,
{
    let partial = partial_path(dest);
    let invocation = downloader.invocation(url, &partial);
    let tool = downloader.tool();
    debug!(%tool, url, dest = %dest.display(), "starting download");

    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| FetchError::Spawn { tool, source })?;

    let stderr_reader = child.stderr.take().map(|mut pipe| {
        tokio::spawn(async move {
            let mut text = String::new();
            let _ = pipe.read_to_string(&mut text).await;
            text
        })
    });

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|source| FetchError::Spawn { tool, source })?;
            let stderr = match stderr_reader {
                Some(handle) => handle.await.unwrap_or_default(),
                None => String::new(),
            };
            if !status.success() {
                let _ = fs::remove_file(&partial);
                return Err(FetchError::Failed {
                    tool,
                    status: status.code(),
                    stderr: stderr.trim().to_string(),
                });
            }
            finish(&partial, dest)?;
            Ok(DownloadOutcome::Completed(dest.to_path_buf()))
        }
        _ = interrupt => {
            if let Err(err) = child.kill().await {
                debug!(error = %err, "download already exited");
            }
            if partial.exists() {
                fs::remove_file(&partial).map_err(|source| FetchError::Io {
                    path: partial.clone(),
                    source,
                })?;
            }
            warn!(dest = %dest.display(), "download interrupted, partial file removed");
            Ok(DownloadOutcome::Interrupted)
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::fetch::DownloadTool;
    use std::os::unix::fs::PermissionsExt;
    use std::time::Duration;
    use tempfile::TempDir;

    /// A stand-in for curl: writes to the `-o` argument, then runs `tail`.
    fn fake_curl(dir: &Path, tail: &str) -> PathBuf {
        let script = dir.join("fake-curl");
        fs::write(
            &script,
            format!(
                "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"-o\" ]; then out=\"$2\"; fi\n  shift\ndone\necho data > \"$out\"\n{tail}\n"
            ),
        )
        .unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[tokio::test]
    async fn completed_download_lands_at_destination() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(DownloadTool::Curl, fake_curl(dir.path(), "exit 0"));
        let dest = dir.path().join("data.csv");
        let outcome = download_until(
            &downloader,
            "https://x.test/data.csv",
            &dest,
            std::future::pending(),
        )
        .await
        .unwrap();
        assert_eq!(outcome, DownloadOutcome::Completed(dest.clone()));
        assert_eq!(fs::read_to_string(&dest).unwrap(), "data\n");
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn failed_download_leaves_nothing_behind() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(
            DownloadTool::Curl,
            fake_curl(dir.path(), "echo 'curl: (22) 404' >&2\nexit 22"),
        );
        let dest = dir.path().join("data.csv");
        let err = download_until(&downloader, "https://x.test", &dest, std::future::pending())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Failed { status: Some(22), .. }));
        assert!(err.to_string().contains("404"));
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }

    #[tokio::test]
    async fn interrupt_kills_child_and_removes_partial() {
        let dir = TempDir::new().unwrap();
        let downloader = Downloader::new(DownloadTool::Curl, fake_curl(dir.path(), "sleep 30"));
        let dest = dir.path().join("big.csv");
        let outcome = download_until(
            &downloader,
            "https://x.test/big.csv",
            &dest,
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await
        .unwrap();
        assert_eq!(outcome, DownloadOutcome::Interrupted);
        assert!(!dest.exists());
        assert!(!partial_path(&dest).exists());
    }
}

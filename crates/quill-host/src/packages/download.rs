//! Fetching package sources.

use std::fs;
use std::io::{self, Read};
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::PackageDeclaration;

const DOWNLOAD_TARGET: &str = "quill_host::packages::download";

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Failures fetching package sources.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The download program could not be started.
    #[error("failed to run '{program}': {source}")]
    Spawn {
        /// Program name.
        program: String,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The download program exited unsuccessfully.
    #[error("'{program}' exited with status {status}: {stderr}")]
    Failed {
        /// Program name.
        program: String,
        /// Exit code, or -1 when killed by a signal.
        status: i32,
        /// Trimmed standard error output.
        stderr: String,
    },

    /// The download ran past its deadline and was killed.
    #[error("download timed out after {timeout_secs}s")]
    TimedOut {
        /// Configured timeout.
        timeout_secs: u64,
    },

    /// The destination could not be prepared.
    #[error("I/O error on '{path}': {source}")]
    Io {
        /// Path involved.
        path: Utf8PathBuf,
        /// Underlying error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// Places a declared package's sources in a directory.
pub trait Downloader: Send + Sync {
    /// Downloads `declaration` into `destination`.
    ///
    /// # Errors
    ///
    /// Returns a [`DownloadError`] if the sources cannot be fetched.
    fn download(
        &self,
        declaration: &PackageDeclaration,
        destination: &Utf8Path,
    ) -> Result<(), DownloadError>;
}

/// Shallow-clones package repositories with `git`.
///
/// An existing destination is treated as already downloaded. A clone that
/// fails or times out has its destination removed so a partial checkout is
/// never mistaken for a finished one.
#[derive(Debug, Clone)]
pub struct GitDownloader {
    program: String,
    timeout: Duration,
}

impl GitDownloader {
    /// Uses `git` from `PATH`, killing clones that exceed `timeout`.
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_program("git", timeout)
    }

    /// Uses a specific git executable.
    #[must_use]
    pub fn with_program(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl Downloader for GitDownloader {
    fn download(
        &self,
        declaration: &PackageDeclaration,
        destination: &Utf8Path,
    ) -> Result<(), DownloadError> {
        if destination.exists() {
            debug!(
                target: DOWNLOAD_TARGET,
                url = %declaration.url,
                destination = %destination,
                "reusing existing download"
            );
            return Ok(());
        }
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent).map_err(|source| DownloadError::Io {
                path: parent.to_owned(),
                source: Arc::new(source),
            })?;
        }

        let mut command = Command::new(&self.program);
        command.args(["clone", "--depth", "1"]);
        if let Some(version) = &declaration.version {
            command.args(["--branch", version.as_str()]);
        }
        command
            .arg(&declaration.url)
            .arg(destination.as_std_path())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        debug!(
            target: DOWNLOAD_TARGET,
            url = %declaration.url,
            version = ?declaration.version,
            destination = %destination,
            "cloning package"
        );
        let mut child = command.spawn().map_err(|source| DownloadError::Spawn {
            program: self.program.clone(),
            source: Arc::new(source),
        })?;
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut text = String::new();
                drop(pipe.read_to_string(&mut text));
                text
            })
        });

        let outcome = wait_for_exit(&self.program, &mut child, self.timeout);
        let stderr = stderr
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();
        let result = match outcome {
            Ok(Some(0)) => return Ok(()),
            Ok(status) => Err(DownloadError::Failed {
                program: self.program.clone(),
                status: status.unwrap_or(-1),
                stderr: stderr.trim().to_owned(),
            }),
            Err(error) => Err(error),
        };
        discard_partial(destination);
        result
    }
}

fn discard_partial(destination: &Utf8Path) {
    if !destination.exists() {
        return;
    }
    match fs::remove_dir_all(destination) {
        Ok(()) => debug!(
            target: DOWNLOAD_TARGET,
            destination = %destination,
            "removed partial download"
        ),
        Err(error) => warn!(
            target: DOWNLOAD_TARGET,
            destination = %destination,
            %error,
            "failed to remove partial download"
        ),
    }
}

/// Polls the child until it exits, killing it once `timeout` passes.
///
/// Returns the exit code, `None` when the child died from a signal.
fn wait_for_exit(
    program: &str,
    child: &mut Child,
    timeout: Duration,
) -> Result<Option<i32>, DownloadError> {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                debug!(target: DOWNLOAD_TARGET, program, ?status, "download process exited");
                return Ok(status.code());
            }
            Ok(None) if start.elapsed() > timeout => {
                warn!(
                    target: DOWNLOAD_TARGET,
                    timeout_secs = timeout.as_secs(),
                    "download timed out, killing process"
                );
                drop(child.kill());
                drop(child.wait());
                return Err(DownloadError::TimedOut {
                    timeout_secs: timeout.as_secs(),
                });
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(error) => {
                return Err(DownloadError::Spawn {
                    program: program.to_owned(),
                    source: Arc::new(error),
                });
            }
        }
    }
}

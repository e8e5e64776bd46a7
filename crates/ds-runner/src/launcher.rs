//! Child-process boundary shared by the build step and the invocation client.

use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// One child process to run to completion.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    /// Bytes written to the child's stdin before it is closed. `None`
    /// attaches stdin to nothing.
    pub stdin: Option<Vec<u8>>,
    pub timeout: Option<Duration>,
}

impl LaunchRequest {
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            stdin: None,
            timeout: None,
        }
    }

    pub fn with_stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn display_program(&self) -> String {
        self.program.display().to_string()
    }
}

/// Everything a finished child left behind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOutput {
    /// Exit code, `None` when the child was killed by a signal.
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl LaunchOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("failed to spawn: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("lost contact with child: {0}")]
    Io(#[source] std::io::Error),
}

/// Runs child processes. Swapped for a scripted stand-in in tests.
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    /// Spawn, feed stdin, collect stdout/stderr and wait for exit.
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutput, LaunchError>;
}

/// Launcher backed by `tokio::process`.
///
/// Children are spawned with `kill_on_drop`, so a timeout, or the
/// orchestrator dropping the in-flight future on shutdown, kills the child
/// instead of orphaning it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioLauncher;

#[async_trait]
impl ProcessLauncher for TokioLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutput, LaunchError> {
        let mut cmd = Command::new(&request.program);
        cmd.args(&request.args)
            .stdin(if request.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &request.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd.spawn().map_err(LaunchError::Spawn)?;
        debug!(program = %request.display_program(), pid = ?child.id(), "spawned child");

        let stdin_pipe = child.stdin.take();
        let input = request.stdin;
        let feed = async move {
            if let (Some(mut pipe), Some(bytes)) = (stdin_pipe, input) {
                match pipe.write_all(&bytes).await {
                    // The child may exit without reading; its exit status decides.
                    Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
                    Err(e) => return Err(e),
                    Ok(()) => {}
                }
                pipe.shutdown().await.or_else(|e| {
                    if e.kind() == std::io::ErrorKind::BrokenPipe {
                        Ok(())
                    } else {
                        Err(e)
                    }
                })?;
            }
            Ok::<(), std::io::Error>(())
        };
        // Feed stdin while draining stdout/stderr so neither side blocks.
        let exchange = async { tokio::join!(feed, child.wait_with_output()) };

        let (fed, output) = match request.timeout {
            Some(limit) => tokio::time::timeout(limit, exchange)
                .await
                .map_err(|_| LaunchError::TimedOut(limit))?,
            None => exchange.await,
        };
        fed.map_err(LaunchError::Io)?;
        let output = output.map_err(LaunchError::Io)?;

        Ok(LaunchOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

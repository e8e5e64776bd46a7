//! Invocation client: one configuration in, one run result out.
//!
//! The training program is started as `<program> train`, receives the
//! configuration as a single JSON document on stdin (closed afterwards), and
//! on success prints diagnostics followed by one final JSON line of metrics.
//! Only that final line is authoritative.

use ds_types::{Configuration, InvocationError, RunResult};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::launcher::{LaunchError, LaunchRequest, ProcessLauncher};

/// Marker argument that puts the training program in training mode.
pub const TRAIN_MARKER: &str = "train";

/// How the result document is located in the program's stdout.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ResultFraming {
    /// The last non-empty line is the result.
    #[default]
    LastLine,
    /// The last line starting with `prefix` carries the result after it.
    Sentinel { prefix: String },
}

impl ResultFraming {
    /// Pull the run result out of a successful run's stdout. Earlier lines
    /// are never tried as a fallback.
    pub fn extract(&self, stdout: &str) -> Result<RunResult, InvocationError> {
        let mut lines = stdout.lines().filter(|l| !l.trim().is_empty());
        let last = lines.clone().last().ok_or(InvocationError::EmptyOutput)?;

        let (line, payload) = match self {
            Self::LastLine => (last, last),
            Self::Sentinel { prefix } => match lines.rfind(|l| l.starts_with(prefix.as_str())) {
                Some(line) => (line, &line[prefix.len()..]),
                None => {
                    return Err(InvocationError::MalformedResult {
                        line: last.to_string(),
                    })
                }
            },
        };

        RunResult::from_json_line(payload.trim()).map_err(|_| InvocationError::MalformedResult {
            line: line.to_string(),
        })
    }
}

pub struct InvocationClient<L> {
    launcher: L,
    program: PathBuf,
    working_dir: Option<PathBuf>,
    timeout: Option<Duration>,
    framing: ResultFraming,
}

impl<L: ProcessLauncher> InvocationClient<L> {
    pub fn new(launcher: L, program: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            program: program.into(),
            working_dir: None,
            timeout: None,
            framing: ResultFraming::default(),
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_framing(mut self, framing: ResultFraming) -> Self {
        self.framing = framing;
        self
    }

    /// Run the training program once on `config`. Spawns exactly one child
    /// and never retries.
    ///
    /// A configuration that cannot be encoded (non-finite floats) fails with
    /// [`InvocationError::Encode`] before anything is spawned. Stdout is
    /// decoded lossily, so invalid UTF-8 in the result line surfaces as
    /// U+FFFD inside [`InvocationError::MalformedResult`].
    pub async fn invoke(&self, config: &Configuration) -> Result<RunResult, InvocationError> {
        let payload = config
            .to_json_line()
            .map_err(|e| InvocationError::Encode {
                message: e.to_string(),
            })?;

        let request = LaunchRequest::new(self.program.clone(), [TRAIN_MARKER])
            .with_stdin(payload.into_bytes())
            .with_working_dir(self.working_dir.clone())
            .with_timeout(self.timeout);

        info!(
            program = %self.program.display(),
            run = config.run_id().unwrap_or("-"),
            "running training program"
        );
        let output = self.launcher.launch(request).await.map_err(|e| match e {
            LaunchError::TimedOut(limit) => InvocationError::Timeout {
                timeout_seconds: limit.as_secs(),
            },
            other => InvocationError::Launch {
                program: self.program.display().to_string(),
                message: other.to_string(),
            },
        })?;

        if !output.success() {
            return Err(InvocationError::Failed {
                status: output.status,
                stderr: output.stderr_lossy(),
            });
        }

        let stdout = output.stdout_lossy();
        for line in stdout.lines() {
            debug!(target: "trainer", "{line}");
        }
        self.framing.extract(&stdout)
    }
}

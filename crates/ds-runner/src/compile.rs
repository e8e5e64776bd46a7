//! Optimized build of the training program before it is invoked.

use ds_types::BuildError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info};

use crate::launcher::{LaunchError, LaunchRequest, ProcessLauncher};

/// Default build command, run from the repository root.
pub const DEFAULT_BUILD_COMMAND: [&str; 3] = ["cargo", "build", "--release"];

/// When the build runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildPolicy {
    /// Rebuild before every run.
    #[default]
    Always,
    /// Rebuild before the first run of this process only. Later runs reuse
    /// that build, which is never older than the session.
    OncePerSession,
}

pub struct BuildStep<L> {
    launcher: L,
    command: Vec<String>,
    repo_root: PathBuf,
    timeout: Option<Duration>,
    policy: BuildPolicy,
    built: bool,
}

impl<L: ProcessLauncher> BuildStep<L> {
    pub fn new(launcher: L, repo_root: impl Into<PathBuf>) -> Self {
        Self {
            launcher,
            command: DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
            repo_root: repo_root.into(),
            timeout: None,
            policy: BuildPolicy::default(),
            built: false,
        }
    }

    /// Replace the build command. An empty command keeps the default.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        if !command.is_empty() {
            self.command = command;
        }
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_policy(mut self, policy: BuildPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Make sure the training program is freshly built.
    pub async fn ensure_built(&mut self) -> Result<(), BuildError> {
        if self.built && self.policy == BuildPolicy::OncePerSession {
            debug!("reusing build from this session");
            return Ok(());
        }

        let (program, args) = self
            .command
            .split_first()
            .map(|(p, a)| (p.clone(), a.to_vec()))
            .unwrap_or_else(|| ("cargo".to_string(), vec![]));

        info!(command = %self.command.join(" "), root = %self.repo_root.display(), "building training program");
        let request = LaunchRequest::new(program.as_str(), args)
            .with_working_dir(Some(self.repo_root.clone()))
            .with_timeout(self.timeout);

        let output = self.launcher.launch(request).await.map_err(|e| match e {
            LaunchError::TimedOut(limit) => BuildError::Timeout {
                timeout_seconds: limit.as_secs(),
            },
            other => BuildError::Launch {
                program: program.clone(),
                message: other.to_string(),
            },
        })?;

        if !output.success() {
            return Err(BuildError::Failed {
                status: output.status,
                stderr: output.stderr_lossy(),
            });
        }

        self.built = true;
        info!("release build finished");
        Ok(())
    }
}

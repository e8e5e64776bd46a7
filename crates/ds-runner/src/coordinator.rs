//! Run coordinator: one merged configuration, one build, one invocation.

use ds_optimizer::{default_training_options, RunContext, RunOutcome, Tracker};
use ds_types::{Configuration, DsResult, RunResult};
use tracing::{info, warn};

use crate::compile::{BuildPolicy, BuildStep};
use crate::invocation::InvocationClient;
use crate::launcher::ProcessLauncher;
use crate::settings::Settings;

pub struct RunCoordinator<L> {
    defaults: Configuration,
    build: BuildStep<L>,
    client: InvocationClient<L>,
}

impl<L: ProcessLauncher> RunCoordinator<L> {
    pub fn new(defaults: Configuration, build: BuildStep<L>, client: InvocationClient<L>) -> Self {
        Self {
            defaults,
            build,
            client,
        }
    }

    /// Coordinator for the preset training options, building and running
    /// the trainer from the repository root so its relative data and model
    /// paths resolve there.
    pub fn from_settings(launcher: L, settings: &Settings, policy: BuildPolicy) -> Self
    where
        L: Clone,
    {
        let build = BuildStep::new(launcher.clone(), &settings.repo_root)
            .with_command(settings.build_command.clone())
            .with_timeout(settings.build_timeout)
            .with_policy(policy);
        let client = InvocationClient::new(launcher, &settings.train_bin)
            .with_working_dir(&settings.repo_root)
            .with_timeout(settings.train_timeout);
        Self::new(default_training_options(), build, client)
    }

    /// Build and invoke the training program for a run the tracker has
    /// already opened. The run's name becomes the run identifier the
    /// program sees.
    ///
    /// Metrics are recorded only on success; any failure is returned as is
    /// and nothing is recorded for the run.
    pub async fn execute<T>(
        &mut self,
        tracker: &mut T,
        run: &RunContext,
        overrides: &Configuration,
    ) -> DsResult<RunResult>
    where
        T: Tracker + ?Sized,
    {
        let config = self.defaults.merge(overrides).with_run_id(run.name.clone());

        self.build.ensure_built().await?;
        let result = self.client.invoke(&config).await?;

        tracker.record_metrics(run, &result).await?;
        info!(run = %run.name, metrics = ?result, "run finished");
        Ok(result)
    }

    /// Single run outside any sweep: open a run, execute it, close it.
    pub async fn run_once<T>(&mut self, tracker: &mut T, overrides: &Configuration) -> DsResult<RunResult>
    where
        T: Tracker + ?Sized,
    {
        let run = tracker.init_run(&self.defaults.merge(overrides)).await?;
        let outcome = self.execute(tracker, &run, overrides).await;
        close_run(tracker, &run, outcome).await
    }
}

/// Report how a run ended to the tracker and hand the outcome back. The
/// run's own error wins over a failure to close it.
pub(crate) async fn close_run<T, R>(tracker: &mut T, run: &RunContext, outcome: DsResult<R>) -> DsResult<R>
where
    T: Tracker + ?Sized,
{
    match outcome {
        Ok(value) => {
            tracker.finish_run(run, RunOutcome::Finished).await?;
            Ok(value)
        }
        Err(err) => {
            let failed = RunOutcome::Failed {
                error: err.to_string(),
            };
            if let Err(close_err) = tracker.finish_run(run, failed).await {
                warn!(run = %run.name, error = %close_err, "could not mark run as failed");
            }
            Err(err)
        }
    }
}

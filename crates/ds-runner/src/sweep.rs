//! Sweep coordinator: drives trials of the run coordinator under a sweep the
//! tracker owns.
//!
//! Trials run strictly one after another. Each trial's metrics reach the
//! tracker before the next assignment is requested, and the tracker's answer
//! to `next_trial` is the only source of sweep progress.

use ds_optimizer::{MetricTarget, SweepHandle, SweepSpecification, Tracker, TrialResult};
use ds_types::{validation_error, DsError, DsResult};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::coordinator::{close_run, RunCoordinator};
use crate::launcher::ProcessLauncher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SweepPhase {
    Unregistered,
    Registered { handle: SweepHandle },
    Running { handle: SweepHandle },
    Idle { handle: SweepHandle },
}

impl SweepPhase {
    pub fn handle(&self) -> Option<&SweepHandle> {
        match self {
            Self::Unregistered => None,
            Self::Registered { handle } | Self::Running { handle } | Self::Idle { handle } => {
                Some(handle)
            }
        }
    }
}

/// What a failed trial does to the rest of the sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrialFailurePolicy {
    /// The first failed trial ends the sweep with its error.
    #[default]
    Abort,
    /// Build and invocation failures mark the trial failed and the sweep
    /// moves on. Tracker failures still end the sweep.
    Isolate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    CountReached,
    Exhausted,
}

/// Outcome of one `run` of a sweep, as seen from this process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub handle: SweepHandle,
    pub trials_run: usize,
    pub completed: usize,
    pub failed: usize,
    pub best: Option<TrialResult>,
    pub stop: StopReason,
}

pub struct SweepCoordinator<L, T> {
    runner: RunCoordinator<L>,
    tracker: T,
    policy: TrialFailurePolicy,
    phase: SweepPhase,
    metric: Option<MetricTarget>,
}

impl<L: ProcessLauncher, T: Tracker> SweepCoordinator<L, T> {
    pub fn new(runner: RunCoordinator<L>, tracker: T) -> Self {
        Self {
            runner,
            tracker,
            policy: TrialFailurePolicy::default(),
            phase: SweepPhase::Unregistered,
            metric: None,
        }
    }

    pub fn with_failure_policy(mut self, policy: TrialFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn phase(&self) -> &SweepPhase {
        &self.phase
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn into_tracker(self) -> T {
        self.tracker
    }

    /// Register a new sweep with the tracker.
    pub async fn register(&mut self, spec: &SweepSpecification) -> DsResult<SweepHandle> {
        self.ensure_unregistered()?;
        let handle = self.tracker.register_sweep(spec).await?;
        self.metric = Some(spec.metric.clone());
        self.phase = SweepPhase::Registered {
            handle: handle.clone(),
        };
        Ok(handle)
    }

    /// Resume a sweep the tracker already knows.
    pub async fn attach(&mut self, handle: SweepHandle) -> DsResult<()> {
        self.ensure_unregistered()?;
        let spec = self.tracker.attach_sweep(&handle).await?;
        self.metric = Some(spec.metric);
        self.phase = SweepPhase::Registered { handle };
        Ok(())
    }

    fn ensure_unregistered(&self) -> DsResult<()> {
        match self.phase.handle() {
            None => Ok(()),
            Some(handle) => Err(validation_error!(
                "coordinator is already bound to sweep {handle}"
            )),
        }
    }

    /// Run trials until `count` have run or the tracker has nothing left.
    /// `None` runs until exhaustion.
    pub async fn run(&mut self, count: Option<usize>) -> DsResult<SweepSummary> {
        let handle = match &self.phase {
            SweepPhase::Registered { handle } => handle.clone(),
            SweepPhase::Unregistered => {
                return Err(validation_error!("no sweep registered or attached"))
            }
            other => {
                return Err(validation_error!(
                    "sweep cannot be started from phase {other:?}"
                ))
            }
        };

        self.phase = SweepPhase::Running {
            handle: handle.clone(),
        };
        info!(sweep = %handle, count = ?count, policy = ?self.policy, "starting sweep");

        let outcome = self.drive(&handle, count).await;
        self.phase = SweepPhase::Idle { handle };
        outcome
    }

    async fn drive(&mut self, handle: &SweepHandle, count: Option<usize>) -> DsResult<SweepSummary> {
        let mut summary = SweepSummary {
            handle: handle.clone(),
            trials_run: 0,
            completed: 0,
            failed: 0,
            best: None,
            stop: StopReason::CountReached,
        };

        loop {
            if count.is_some_and(|limit| summary.trials_run >= limit) {
                summary.stop = StopReason::CountReached;
                break;
            }
            let Some(assignment) = self.tracker.next_trial(handle).await? else {
                summary.stop = StopReason::Exhausted;
                break;
            };
            summary.trials_run += 1;
            info!(
                sweep = %handle,
                run = %assignment.run.name,
                trial = summary.trials_run,
                "starting trial"
            );

            let outcome = self
                .runner
                .execute(&mut self.tracker, &assignment.run, &assignment.overrides)
                .await;
            match close_run(&mut self.tracker, &assignment.run, outcome).await {
                Ok(result) => {
                    summary.completed += 1;
                    if let Some(metric) = &self.metric {
                        if let Some(objective) = result.get(&metric.name) {
                            let better = summary
                                .best
                                .as_ref()
                                .map_or(true, |b| metric.goal.improves(objective, b.objective));
                            if better {
                                summary.best = Some(TrialResult {
                                    run_name: assignment.run.name.clone(),
                                    objective,
                                    metrics: result,
                                    parameters: assignment.overrides,
                                });
                            }
                        }
                    }
                }
                Err(err) if self.policy == TrialFailurePolicy::Isolate && is_trial_failure(&err) => {
                    summary.failed += 1;
                    warn!(
                        sweep = %handle,
                        run = %assignment.run.name,
                        error = %err,
                        "trial failed, continuing"
                    );
                }
                Err(err) => {
                    warn!(sweep = %handle, run = %assignment.run.name, error = %err, "aborting sweep");
                    return Err(err);
                }
            }
        }

        info!(
            sweep = %handle,
            completed = summary.completed,
            failed = summary.failed,
            stop = ?summary.stop,
            "sweep idle"
        );
        Ok(summary)
    }
}

/// Failures that belong to a single trial rather than to the sweep.
fn is_trial_failure(err: &DsError) -> bool {
    matches!(err, DsError::Build(_) | DsError::Invocation(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::BuildStep;
    use crate::invocation::InvocationClient;
    use crate::launcher::LaunchOutput;
    use crate::testing::{Journal, ScriptedLauncher, StubTracker};
    use ds_optimizer::{
        default_training_options, ensemble_sweep, LocalTracker, RunOutcome, TrackerIdentity,
        TrialStatus,
    };
    use ds_types::{Configuration, InvocationError, ParamValue, TrackingError};

    fn runner(launcher: &ScriptedLauncher) -> RunCoordinator<ScriptedLauncher> {
        RunCoordinator::new(
            default_training_options(),
            BuildStep::new(launcher.clone(), "."),
            InvocationClient::new(launcher.clone(), "target/release/cli"),
        )
    }

    fn overrides(sizes: &[i64]) -> Vec<Configuration> {
        sizes
            .iter()
            .map(|n| Configuration::new().with("ensemble_size", *n))
            .collect()
    }

    fn ppt(value: f64) -> LaunchOutput {
        LaunchOutput::ok(&format!("building model...\n{{\"ppt\": {value}}}\n"))
    }

    fn sent_sizes(launcher: &ScriptedLauncher) -> Vec<ParamValue> {
        launcher
            .requests()
            .into_iter()
            .filter_map(|r| r.stdin)
            .map(|bytes| {
                let config = Configuration::from_json(std::str::from_utf8(&bytes).unwrap()).unwrap();
                config.get("ensemble_size").cloned().unwrap()
            })
            .collect()
    }

    #[tokio::test]
    async fn three_trials_run_strictly_in_sequence() {
        let journal = Journal::default();
        let launcher = ScriptedLauncher::trainer(journal.clone(), vec![ppt(0.42)]);
        let tracker = StubTracker::new(journal.clone(), overrides(&[1, 5, 10]));
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        sweep.register(&ensemble_sweep()).await.unwrap();
        let summary = sweep.run(Some(3)).await.unwrap();

        let trial = ["next", "build", "invoke", "record", "finish"];
        let expected: Vec<&str> = std::iter::once("register")
            .chain(trial.iter().copied().cycle().take(15))
            .collect();
        assert_eq!(journal.entries(), expected);
        assert_eq!(launcher.max_in_flight(), 1);
        assert_eq!(
            sent_sizes(&launcher),
            vec![ParamValue::Int(1), ParamValue::Int(5), ParamValue::Int(10)]
        );

        assert_eq!(summary.trials_run, 3);
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.stop, StopReason::CountReached);
        assert_eq!(sweep.tracker().recorded.len(), 3);
        assert!(matches!(sweep.phase(), SweepPhase::Idle { .. }));
    }

    #[tokio::test]
    async fn failing_trial_aborts_the_sweep() {
        let journal = Journal::default();
        let launcher = ScriptedLauncher::trainer(
            journal.clone(),
            vec![ppt(0.42), LaunchOutput::exit(1, "panicked at 'index out of bounds'"), ppt(0.40)],
        );
        let tracker = StubTracker::new(journal.clone(), overrides(&[1, 5, 10, 15, 20]));
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        sweep.register(&ensemble_sweep()).await.unwrap();
        let err = sweep.run(Some(5)).await.unwrap_err();

        match &err {
            DsError::Invocation(InvocationError::Failed { status, stderr }) => {
                assert_eq!(*status, Some(1));
                assert_eq!(stderr, "panicked at 'index out of bounds'");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(journal.count("record"), 1);
        assert_eq!(journal.count("invoke"), 2);
        assert_eq!(journal.count("next"), 2);

        let tracker = sweep.into_tracker();
        assert_eq!(tracker.recorded.len(), 1);
        assert_eq!(tracker.finished.len(), 2);
        assert!(matches!(tracker.finished[1].1, RunOutcome::Failed { .. }));
    }

    #[tokio::test]
    async fn isolate_policy_continues_past_failures() {
        let journal = Journal::default();
        let launcher = ScriptedLauncher::trainer(
            journal.clone(),
            vec![ppt(0.42), LaunchOutput::exit(1, "panicked"), ppt(0.40)],
        );
        let tracker = StubTracker::new(journal.clone(), overrides(&[1, 5, 10, 15, 20]));
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker)
            .with_failure_policy(TrialFailurePolicy::Isolate);

        sweep.register(&ensemble_sweep()).await.unwrap();
        let summary = sweep.run(Some(5)).await.unwrap();

        assert_eq!(summary.trials_run, 5);
        assert_eq!(summary.completed, 4);
        assert_eq!(summary.failed, 1);
        assert_eq!(journal.count("record"), 4);
        assert_eq!(journal.count("finish"), 5);
        let best = summary.best.unwrap();
        assert_eq!(best.objective, 0.40);
        assert_eq!(best.run_name, "ensemble-sweep-3");
    }

    #[tokio::test]
    async fn stops_when_the_tracker_is_exhausted() {
        let journal = Journal::default();
        let launcher = ScriptedLauncher::trainer(journal.clone(), vec![ppt(0.5)]);
        let tracker = StubTracker::new(journal.clone(), overrides(&[1, 5]));
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        sweep.register(&ensemble_sweep()).await.unwrap();
        let summary = sweep.run(Some(15)).await.unwrap();

        assert_eq!(summary.trials_run, 2);
        assert_eq!(summary.stop, StopReason::Exhausted);
        assert_eq!(journal.count("next"), 3);
    }

    #[tokio::test]
    async fn zero_count_asks_for_nothing() {
        let journal = Journal::default();
        let launcher = ScriptedLauncher::trainer(journal.clone(), vec![ppt(0.5)]);
        let tracker = StubTracker::new(journal.clone(), overrides(&[1]));
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        sweep.register(&ensemble_sweep()).await.unwrap();
        let summary = sweep.run(Some(0)).await.unwrap();
        assert_eq!(summary.trials_run, 0);
        assert_eq!(journal.entries(), vec!["register"]);
    }

    #[tokio::test]
    async fn best_follows_the_metric_goal() {
        let journal = Journal::default();
        let launcher =
            ScriptedLauncher::trainer(journal.clone(), vec![ppt(0.5), ppt(0.3), ppt(0.4)]);
        let tracker = StubTracker::new(journal.clone(), overrides(&[1, 5, 10]));
        let handle = tracker.handle();
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        sweep.attach(handle).await.unwrap();
        let summary = sweep.run(None).await.unwrap();

        let best = summary.best.unwrap();
        assert_eq!(best.run_name, "stub-sweep-2");
        assert_eq!(best.parameters.get("ensemble_size"), Some(&ParamValue::Int(5)));
        assert_eq!(summary.stop, StopReason::Exhausted);
    }

    #[tokio::test]
    async fn register_and_attach_are_exclusive() {
        let journal = Journal::default();
        let launcher = ScriptedLauncher::trainer(journal.clone(), vec![ppt(0.5)]);
        let tracker = StubTracker::new(journal.clone(), vec![]);
        let handle = tracker.handle();
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        sweep.register(&ensemble_sweep()).await.unwrap();
        assert!(matches!(
            sweep.attach(handle).await.unwrap_err(),
            DsError::Validation(_)
        ));
        assert!(matches!(
            sweep.register(&ensemble_sweep()).await.unwrap_err(),
            DsError::Validation(_)
        ));
        assert_eq!(journal.entries(), vec!["register"]);
    }

    #[tokio::test]
    async fn unknown_sweep_cannot_be_attached() {
        let journal = Journal::default();
        let launcher = ScriptedLauncher::trainer(journal.clone(), vec![ppt(0.5)]);
        let tracker = StubTracker::new(journal, vec![]);
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        let err = sweep.attach(SweepHandle::from("nope")).await.unwrap_err();
        assert!(matches!(
            err,
            DsError::Tracking(TrackingError::SweepNotFound { .. })
        ));
        assert_eq!(sweep.phase(), &SweepPhase::Unregistered);
        assert!(matches!(
            sweep.run(Some(1)).await.unwrap_err(),
            DsError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn idle_sweep_is_not_restarted() {
        let journal = Journal::default();
        let launcher = ScriptedLauncher::trainer(journal.clone(), vec![ppt(0.5)]);
        let tracker = StubTracker::new(journal, overrides(&[1]));
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        sweep.register(&ensemble_sweep()).await.unwrap();
        sweep.run(None).await.unwrap();
        assert!(sweep.run(None).await.is_err());
    }

    #[tokio::test]
    async fn ensemble_sweep_against_local_tracker() {
        let launcher = ScriptedLauncher::trainer(
            Journal::default(),
            vec![ppt(0.61), ppt(0.58), ppt(0.60)],
        );
        let tracker = LocalTracker::in_memory(TrackerIdentity::new("clm", "research"));
        let mut sweep = SweepCoordinator::new(runner(&launcher), tracker);

        sweep.register(&ensemble_sweep()).await.unwrap();
        let summary = sweep.run(Some(3)).await.unwrap();
        assert_eq!(summary.completed, 3);
        assert_eq!(summary.best.as_ref().unwrap().objective, 0.58);

        let first = launcher
            .requests()
            .into_iter()
            .find_map(|r| r.stdin)
            .unwrap();
        let sent = Configuration::from_json(std::str::from_utf8(&first).unwrap()).unwrap();
        assert_eq!(sent.run_id(), Some("ensemble-sweep-1"));
        assert_eq!(sent.get("nb_theads"), Some(&ParamValue::Int(1)));
        assert_eq!(sent.get("nb_threads"), Some(&ParamValue::Int(8)));
        assert_eq!(sent.get("inference_basis"), Some(&ParamValue::Float(1.55)));

        let tracker = sweep.into_tracker();
        assert_eq!(tracker.trials().len(), 3);
        assert!(tracker
            .trials()
            .iter()
            .all(|t| t.status == TrialStatus::Completed));
    }
}

//! In-process tracker with an optional JSON ledger on disk.
//!
//! [`LocalTracker`] plays the role a hosted experiment tracker would: it owns
//! the search strategy of every sweep, names runs, keeps their metrics and
//! the best trial so far. When opened on a state directory the ledger is
//! written after every change, so a grid sweep can be resumed by handle from
//! another process without reissuing points that were already dispatched.

use async_trait::async_trait;
use ds_types::{Configuration, DsResult, RunResult, TrackingError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::search::{SearchStrategy, SweepSpecification};
use crate::tracker::{RunOutcome, Tracker, TrackerIdentity, TrialAssignment};
use crate::trial::{
    RunContext, SweepHandle, SweepState, SweepStatus, Trial, TrialResult, TrialStatus,
};

/// Steps per continuous axis when a grid sweep contains ranges.
pub const DEFAULT_GRID_FLOAT_STEPS: usize = 5;
/// Probability of a pure exploration sample in bayes sweeps.
pub const DEFAULT_EXPLORATION_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Ledger {
    identity: TrackerIdentity,
    sweeps: BTreeMap<SweepHandle, SweepStatus>,
    trials: Vec<Trial>,
}

pub struct LocalTracker {
    ledger: Ledger,
    state_path: Option<PathBuf>,
    strategies: HashMap<SweepHandle, Box<dyn SearchStrategy>>,
}

impl LocalTracker {
    /// Tracker that forgets everything when dropped.
    pub fn in_memory(identity: TrackerIdentity) -> Self {
        Self {
            ledger: Ledger {
                identity,
                sweeps: BTreeMap::new(),
                trials: Vec::new(),
            },
            state_path: None,
            strategies: HashMap::new(),
        }
    }

    /// Tracker backed by `<state_dir>/<entity>/<project>.json`, loading the
    /// ledger if one exists.
    pub fn open(identity: TrackerIdentity, state_dir: &Path) -> DsResult<Self> {
        let path = state_dir
            .join(&identity.entity)
            .join(format!("{}.json", identity.project));

        let mut tracker = Self::in_memory(identity);
        if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            let ledger: Ledger = serde_json::from_str(&raw).map_err(|e| {
                TrackingError::StateUnavailable {
                    message: format!("{}: {e}", path.display()),
                }
            })?;
            info!(
                path = %path.display(),
                sweeps = ledger.sweeps.len(),
                runs = ledger.trials.len(),
                "loaded tracker ledger"
            );
            tracker.ledger.sweeps = ledger.sweeps;
            tracker.ledger.trials = ledger.trials;
        }
        tracker.state_path = Some(path);
        Ok(tracker)
    }

    pub fn identity(&self) -> &TrackerIdentity {
        &self.ledger.identity
    }

    pub fn state_path(&self) -> Option<&Path> {
        self.state_path.as_deref()
    }

    /// Every run this tracker has opened, oldest first.
    pub fn trials(&self) -> &[Trial] {
        &self.ledger.trials
    }

    fn persist(&self) -> DsResult<()> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&self.ledger)?)?;
        std::fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "persisted tracker ledger");
        Ok(())
    }

    fn sweep(&self, handle: &SweepHandle) -> DsResult<&SweepStatus> {
        self.ledger.sweeps.get(handle).ok_or_else(|| {
            TrackingError::SweepNotFound {
                sweep_id: handle.to_string(),
            }
            .into()
        })
    }

    /// Rebuild a sweep's strategy from the ledger: the grid cursor skips
    /// every point already dispatched and adaptive strategies relearn from
    /// recorded results.
    fn restore_strategy(&self, status: &SweepStatus) -> Box<dyn SearchStrategy> {
        let mut strategy = status
            .spec
            .strategy(DEFAULT_GRID_FLOAT_STEPS, DEFAULT_EXPLORATION_WEIGHT);
        if status.trials_dispatched > 0 {
            strategy.suggest(status.trials_dispatched);
        }
        let goal = status.spec.metric.goal;
        for trial in self.sweep_trials(&status.handle) {
            if let Some(objective) = trial
                .result
                .as_ref()
                .and_then(|r| r.get(&status.spec.metric.name))
            {
                strategy.report(&trial.parameters, goal.normalize(objective));
            }
        }
        strategy
    }

    fn sweep_trials<'a>(&'a self, handle: &'a SweepHandle) -> impl Iterator<Item = &'a Trial> {
        self.ledger
            .trials
            .iter()
            .filter(move |t| t.run.sweep.as_ref() == Some(handle))
    }

    fn trial_index(&self, run: &RunContext) -> DsResult<usize> {
        self.ledger
            .trials
            .iter()
            .position(|t| t.run.id == run.id)
            .ok_or_else(|| {
                TrackingError::RunNotFound {
                    run_id: run.name.clone(),
                }
                .into()
            })
    }
}

#[async_trait]
impl Tracker for LocalTracker {
    async fn register_sweep(&mut self, spec: &SweepSpecification) -> DsResult<SweepHandle> {
        spec.validate()
            .map_err(|message| TrackingError::RegistrationFailed { message })?;

        let handle = SweepHandle::generate();
        let status = SweepStatus::new(handle.clone(), spec.clone());
        self.strategies.insert(
            handle.clone(),
            spec.strategy(DEFAULT_GRID_FLOAT_STEPS, DEFAULT_EXPLORATION_WEIGHT),
        );
        self.ledger.sweeps.insert(handle.clone(), status);
        self.persist()?;

        info!(
            sweep = %handle,
            name = %spec.name,
            method = %spec.method,
            metric = %spec.metric.name,
            grid_size = ?spec.grid_size(),
            "registered sweep"
        );
        Ok(handle)
    }

    async fn attach_sweep(&mut self, handle: &SweepHandle) -> DsResult<SweepSpecification> {
        let status = self.sweep(handle)?;
        let spec = status.spec.clone();
        if !self.strategies.contains_key(handle) {
            let strategy = self.restore_strategy(status);
            self.strategies.insert(handle.clone(), strategy);
        }
        info!(sweep = %handle, name = %spec.name, "attached to sweep");
        Ok(spec)
    }

    async fn next_trial(&mut self, handle: &SweepHandle) -> DsResult<Option<TrialAssignment>> {
        let status = self.sweep(handle)?;
        if status.state == SweepState::Exhausted {
            return Ok(None);
        }
        if !self.strategies.contains_key(handle) {
            let strategy = self.restore_strategy(status);
            self.strategies.insert(handle.clone(), strategy);
        }

        let overrides = self
            .strategies
            .get_mut(handle)
            .and_then(|s| s.suggest(1).pop());

        let Some(status) = self.ledger.sweeps.get_mut(handle) else {
            return Err(TrackingError::SweepNotFound {
                sweep_id: handle.to_string(),
            }
            .into());
        };

        let Some(overrides) = overrides else {
            status.mark_exhausted();
            info!(sweep = %handle, dispatched = status.trials_dispatched, "sweep exhausted");
            self.persist()?;
            return Ok(None);
        };

        status.mark_running();
        status.trials_dispatched += 1;
        let number = status.trials_dispatched;
        let run = RunContext::new(
            format!("{}-{}", status.spec.name, number),
            Some(handle.clone()),
            Some(number),
        );
        self.ledger
            .trials
            .push(Trial::new(run.clone(), overrides.clone()));
        self.persist()?;

        debug!(sweep = %handle, run = %run.name, "dispatched trial");
        Ok(Some(TrialAssignment { run, overrides }))
    }

    async fn init_run(&mut self, config: &Configuration) -> DsResult<RunContext> {
        let standalone = self
            .ledger
            .trials
            .iter()
            .filter(|t| t.run.sweep.is_none())
            .count();
        let run = RunContext::new(
            format!("{}-run-{}", self.ledger.identity.project, standalone + 1),
            None,
            None,
        );
        self.ledger
            .trials
            .push(Trial::new(run.clone(), config.clone()));
        self.persist()?;
        info!(run = %run.name, "opened run");
        Ok(run)
    }

    async fn record_metrics(&mut self, run: &RunContext, result: &RunResult) -> DsResult<()> {
        let index = self.trial_index(run)?;
        let trial = &mut self.ledger.trials[index];
        if trial.is_finished() {
            return Err(TrackingError::RunAlreadyFinished {
                run_id: run.name.clone(),
            }
            .into());
        }
        trial.record(result.clone());
        let parameters = trial.parameters.clone();

        if let Some(handle) = &run.sweep {
            if let Some(status) = self.ledger.sweeps.get_mut(handle) {
                let metric = &status.spec.metric;
                match result.get(&metric.name) {
                    Some(objective) => {
                        if let Some(strategy) = self.strategies.get_mut(handle) {
                            strategy.report(&parameters, metric.goal.normalize(objective));
                        }
                        status.update_best(&TrialResult {
                            run_name: run.name.clone(),
                            objective,
                            metrics: result.clone(),
                            parameters,
                        });
                    }
                    None => warn!(
                        run = %run.name,
                        metric = %metric.name,
                        "run result does not contain the sweep metric"
                    ),
                }
            }
        }

        self.persist()?;
        info!(run = %run.name, metrics = ?result, "recorded metrics");
        Ok(())
    }

    async fn finish_run(&mut self, run: &RunContext, outcome: RunOutcome) -> DsResult<()> {
        let index = self.trial_index(run)?;
        let trial = &mut self.ledger.trials[index];
        if trial.is_finished() {
            return Err(TrackingError::RunAlreadyFinished {
                run_id: run.name.clone(),
            }
            .into());
        }
        match outcome {
            RunOutcome::Finished => trial.mark_completed(),
            RunOutcome::Failed { error } => trial.mark_failed(error),
        }
        let failed = trial.status == TrialStatus::Failed;

        if let Some(status) = run.sweep.as_ref().and_then(|h| self.ledger.sweeps.get_mut(h)) {
            if failed {
                status.trials_failed += 1;
            } else {
                status.trials_completed += 1;
            }
        }

        self.persist()?;
        debug!(run = %run.name, failed, "finished run");
        Ok(())
    }

    async fn sweep_status(&self, handle: &SweepHandle) -> DsResult<SweepStatus> {
        self.sweep(handle).cloned()
    }
}

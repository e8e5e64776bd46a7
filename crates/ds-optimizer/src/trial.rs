//! Trial tracking and sweep lifecycle records.

use chrono::{DateTime, Utc};
use ds_types::{Configuration, RunResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::search::SweepSpecification;

/// Opaque identifier of a sweep registered with a tracker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SweepHandle(pub String);

impl SweepHandle {
    /// Fresh eight-character handle.
    pub fn generate() -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self(id[..8].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SweepHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for SweepHandle {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// A run opened by the tracker. `name` is what the training program sees
/// as its run identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub id: Uuid,
    pub name: String,
    pub sweep: Option<SweepHandle>,
    pub trial_number: Option<usize>,
    pub started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(name: impl Into<String>, sweep: Option<SweepHandle>, trial_number: Option<usize>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            sweep,
            trial_number,
            started_at: Utc::now(),
        }
    }
}

/// Lifecycle state of a sweep as the tracker sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SweepState {
    Pending,
    Running,
    Exhausted,
}

/// Aggregate status of a sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepStatus {
    pub handle: SweepHandle,
    pub spec: SweepSpecification,
    pub state: SweepState,
    pub trials_dispatched: usize,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best_trial: Option<TrialResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SweepStatus {
    pub fn new(handle: SweepHandle, spec: SweepSpecification) -> Self {
        Self {
            handle,
            spec,
            state: SweepState::Pending,
            trials_dispatched: 0,
            trials_completed: 0,
            trials_failed: 0,
            best_trial: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.state = SweepState::Running;
    }

    pub fn mark_exhausted(&mut self) {
        self.state = SweepState::Exhausted;
        self.finished_at = Some(Utc::now());
    }

    /// Update the best trial if `result` improves on the current best.
    pub fn update_best(&mut self, result: &TrialResult) {
        let dominated = match &self.best_trial {
            None => true,
            Some(current_best) => self
                .spec
                .metric
                .goal
                .improves(result.objective, current_best.objective),
        };
        if dominated {
            self.best_trial = Some(result.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Individual trial
// ---------------------------------------------------------------------------

/// A single trial (one override set evaluated by one training run).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub run: RunContext,
    pub parameters: Configuration,
    pub status: TrialStatus,
    pub result: Option<RunResult>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(run: RunContext, parameters: Configuration) -> Self {
        Self {
            run,
            parameters,
            status: TrialStatus::Running,
            result: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn record(&mut self, result: RunResult) {
        self.result = Some(result);
    }

    pub fn mark_completed(&mut self) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, TrialStatus::Completed | TrialStatus::Failed)
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.run.started_at).num_seconds())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrialStatus {
    Running,
    Completed,
    Failed,
}

/// Result of a single trial, scored on the sweep's target metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    pub run_name: String,
    pub objective: f64,
    pub metrics: RunResult,
    pub parameters: Configuration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Goal, SweepMethod};

    fn sample_status(goal: Goal) -> SweepStatus {
        let spec = SweepSpecification::new("test-sweep", SweepMethod::Grid, "ppt", goal)
            .values("ensemble_size", [1, 5, 10]);
        SweepStatus::new(SweepHandle::generate(), spec)
    }

    fn result(name: &str, ppt: f64) -> TrialResult {
        TrialResult {
            run_name: name.to_string(),
            objective: ppt,
            metrics: RunResult::new().with("ppt", ppt),
            parameters: Configuration::new(),
        }
    }

    #[test]
    fn handle_is_short_and_unique() {
        let a = SweepHandle::generate();
        let b = SweepHandle::generate();
        assert_eq!(a.as_str().len(), 8);
        assert_ne!(a, b);
    }

    #[test]
    fn sweep_status_lifecycle() {
        let mut status = sample_status(Goal::Minimize);
        assert_eq!(status.state, SweepState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        assert_eq!(status.state, SweepState::Running);
        assert!(status.started_at.is_some());

        status.mark_exhausted();
        assert_eq!(status.state, SweepState::Exhausted);
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn best_trial_tracking_minimize() {
        let mut status = sample_status(Goal::Minimize);

        status.update_best(&result("a", 0.45));
        assert_eq!(status.best_trial.as_ref().unwrap().run_name, "a");

        status.update_best(&result("b", 0.41));
        assert_eq!(status.best_trial.as_ref().unwrap().run_name, "b");

        // Worse result should not replace
        status.update_best(&result("c", 0.50));
        assert_eq!(status.best_trial.as_ref().unwrap().objective, 0.41);
    }

    #[test]
    fn best_trial_tracking_maximize() {
        let mut status = sample_status(Goal::Maximize);
        status.update_best(&result("a", 0.45));
        status.update_best(&result("b", 0.41));
        assert_eq!(status.best_trial.as_ref().unwrap().run_name, "a");
    }

    #[test]
    fn trial_lifecycle() {
        let run = RunContext::new("test-sweep-1", Some(SweepHandle::from("abc")), Some(1));
        let params = Configuration::new().with("ensemble_size", 5);

        let mut trial = Trial::new(run, params);
        assert_eq!(trial.status, TrialStatus::Running);
        assert!(!trial.is_finished());

        trial.record(RunResult::new().with("ppt", 0.42));
        trial.mark_completed();
        assert_eq!(trial.status, TrialStatus::Completed);
        assert!(trial.finished_at.is_some());
        assert!(trial.duration_seconds().is_some());
        assert_eq!(trial.result.as_ref().unwrap().get("ppt"), Some(0.42));
    }

    #[test]
    fn trial_failure() {
        let mut trial = Trial::new(RunContext::new("r", None, None), Configuration::new());
        trial.mark_failed("training program exited with status Some(1)".into());
        assert_eq!(trial.status, TrialStatus::Failed);
        assert!(trial.is_finished());
        assert!(trial.result.is_none());
    }
}

//! The tracking collaborator: owns sweep state, hands out trials and keeps
//! the metrics every run reports.

use async_trait::async_trait;
use ds_types::{Configuration, DsResult, RunResult};
use serde::{Deserialize, Serialize};

use crate::search::SweepSpecification;
use crate::trial::{RunContext, SweepHandle, SweepStatus};

/// Project and owning entity a tracker files runs under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerIdentity {
    pub project: String,
    pub entity: String,
}

impl TrackerIdentity {
    pub fn new(project: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            entity: entity.into(),
        }
    }
}

/// The next configuration a sweep wants tried, with the run opened for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialAssignment {
    pub run: RunContext,
    pub overrides: Configuration,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RunOutcome {
    Finished,
    Failed { error: String },
}

/// Remote (or local) experiment tracker.
///
/// Every `next_trial` answer is authoritative: callers never infer sweep
/// progress on their own.
#[async_trait]
pub trait Tracker: Send + Sync {
    /// Register a new sweep and return its handle.
    async fn register_sweep(&mut self, spec: &SweepSpecification) -> DsResult<SweepHandle>;

    /// Look up an existing sweep so it can be resumed.
    async fn attach_sweep(&mut self, handle: &SweepHandle) -> DsResult<SweepSpecification>;

    /// Next override set to try, or `None` once the sweep is exhausted.
    async fn next_trial(&mut self, handle: &SweepHandle) -> DsResult<Option<TrialAssignment>>;

    /// Open a run outside any sweep.
    async fn init_run(&mut self, config: &Configuration) -> DsResult<RunContext>;

    /// Attach the metrics of a successful run.
    async fn record_metrics(&mut self, run: &RunContext, result: &RunResult) -> DsResult<()>;

    /// Close a run.
    async fn finish_run(&mut self, run: &RunContext, outcome: RunOutcome) -> DsResult<()>;

    /// Aggregate status of a sweep.
    async fn sweep_status(&self, handle: &SweepHandle) -> DsResult<SweepStatus>;
}

//! Scripted stand-ins for the process boundary and the tracker.

use async_trait::async_trait;
use ds_optimizer::{
    Goal, RunContext, RunOutcome, SweepHandle, SweepMethod, SweepSpecification, SweepStatus,
    Tracker, TrialAssignment,
};
use ds_types::{Configuration, DsResult, RunResult, TrackingError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::invocation::TRAIN_MARKER;
use crate::launcher::{LaunchError, LaunchOutput, LaunchRequest, ProcessLauncher};

impl LaunchOutput {
    pub(crate) fn ok(stdout: &str) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.as_bytes().to_vec(),
            stderr: Vec::new(),
        }
    }

    pub(crate) fn exit(code: i32, stderr: &str) -> Self {
        Self {
            status: Some(code),
            stdout: Vec::new(),
            stderr: stderr.as_bytes().to_vec(),
        }
    }
}

/// Ordered record of every interaction, shared between stand-ins.
#[derive(Debug, Clone, Default)]
pub(crate) struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub(crate) fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub(crate) fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn count(&self, entry: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == entry).count()
    }
}

enum Script {
    /// Outputs for every call, in order; the last one repeats.
    Sequence(Vec<LaunchOutput>),
    /// Builds succeed; trainer calls take outputs in order, the last repeats.
    Trainer(Vec<LaunchOutput>),
    TimeOut,
}

#[derive(Default)]
struct LauncherState {
    requests: Vec<LaunchRequest>,
    builds: usize,
    invocations: usize,
    in_flight: usize,
    max_in_flight: usize,
}

#[derive(Clone)]
pub(crate) struct ScriptedLauncher {
    journal: Journal,
    script: Arc<Script>,
    state: Arc<Mutex<LauncherState>>,
}

impl ScriptedLauncher {
    fn new(journal: Journal, script: Script) -> Self {
        Self {
            journal,
            script: Arc::new(script),
            state: Arc::default(),
        }
    }

    pub(crate) fn succeeding(journal: Journal) -> Self {
        Self::new(journal, Script::Sequence(vec![LaunchOutput::ok("")]))
    }

    pub(crate) fn builds(journal: Journal, outputs: Vec<LaunchOutput>) -> Self {
        Self::new(journal, Script::Sequence(outputs))
    }

    pub(crate) fn trainer(journal: Journal, outputs: Vec<LaunchOutput>) -> Self {
        Self::new(journal, Script::Trainer(outputs))
    }

    pub(crate) fn timing_out(journal: Journal) -> Self {
        Self::new(journal, Script::TimeOut)
    }

    pub(crate) fn requests(&self) -> Vec<LaunchRequest> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Highest number of children that were ever running at once.
    pub(crate) fn max_in_flight(&self) -> usize {
        self.state.lock().unwrap().max_in_flight
    }

    fn pick(outputs: &[LaunchOutput], n: usize) -> LaunchOutput {
        outputs
            .get(n)
            .or_else(|| outputs.last())
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<LaunchOutput, LaunchError> {
        let is_invoke = request.args.first().map(String::as_str) == Some(TRAIN_MARKER);
        let (calls, nth) = {
            let mut state = self.state.lock().unwrap();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.requests.push(request.clone());
            let nth = if is_invoke {
                state.invocations += 1;
                state.invocations - 1
            } else {
                state.builds += 1;
                state.builds - 1
            };
            (state.requests.len() - 1, nth)
        };

        tokio::task::yield_now().await;

        let result = match self.script.as_ref() {
            Script::Sequence(outputs) => Ok(Self::pick(outputs, calls)),
            Script::Trainer(_) if !is_invoke => Ok(LaunchOutput::ok("")),
            Script::Trainer(outputs) => Ok(Self::pick(outputs, nth)),
            Script::TimeOut => Err(LaunchError::TimedOut(
                request.timeout.unwrap_or(Duration::from_secs(1)),
            )),
        };

        self.state.lock().unwrap().in_flight -= 1;
        self.journal.push(if is_invoke { "invoke" } else { "build" });
        result
    }
}

/// Tracker that serves a fixed queue of override sets.
pub(crate) struct StubTracker {
    journal: Journal,
    spec: SweepSpecification,
    handle: SweepHandle,
    queue: VecDeque<Configuration>,
    dispatched: usize,
    pub(crate) recorded: Vec<(String, RunResult)>,
    pub(crate) finished: Vec<(String, RunOutcome)>,
}

impl StubTracker {
    pub(crate) fn new(journal: Journal, overrides: Vec<Configuration>) -> Self {
        Self {
            journal,
            spec: SweepSpecification::new("stub-sweep", SweepMethod::Grid, "ppt", Goal::Minimize)
                .values("ensemble_size", [1, 5, 10]),
            handle: SweepHandle::from("stub0001"),
            queue: overrides.into(),
            dispatched: 0,
            recorded: Vec::new(),
            finished: Vec::new(),
        }
    }

    pub(crate) fn handle(&self) -> SweepHandle {
        self.handle.clone()
    }
}

#[async_trait]
impl Tracker for StubTracker {
    async fn register_sweep(&mut self, spec: &SweepSpecification) -> DsResult<SweepHandle> {
        self.journal.push("register");
        self.spec = spec.clone();
        Ok(self.handle.clone())
    }

    async fn attach_sweep(&mut self, handle: &SweepHandle) -> DsResult<SweepSpecification> {
        self.journal.push("attach");
        if *handle != self.handle {
            return Err(TrackingError::SweepNotFound {
                sweep_id: handle.to_string(),
            }
            .into());
        }
        Ok(self.spec.clone())
    }

    async fn next_trial(&mut self, handle: &SweepHandle) -> DsResult<Option<TrialAssignment>> {
        self.journal.push("next");
        let Some(overrides) = self.queue.pop_front() else {
            return Ok(None);
        };
        self.dispatched += 1;
        let run = RunContext::new(
            format!("{}-{}", self.spec.name, self.dispatched),
            Some(handle.clone()),
            Some(self.dispatched),
        );
        Ok(Some(TrialAssignment { run, overrides }))
    }

    async fn init_run(&mut self, _config: &Configuration) -> DsResult<RunContext> {
        self.journal.push("init");
        Ok(RunContext::new("single-run", None, None))
    }

    async fn record_metrics(&mut self, run: &RunContext, result: &RunResult) -> DsResult<()> {
        self.journal.push("record");
        self.recorded.push((run.name.clone(), result.clone()));
        Ok(())
    }

    async fn finish_run(&mut self, run: &RunContext, outcome: RunOutcome) -> DsResult<()> {
        self.journal.push("finish");
        self.finished.push((run.name.clone(), outcome));
        Ok(())
    }

    async fn sweep_status(&self, handle: &SweepHandle) -> DsResult<SweepStatus> {
        Ok(SweepStatus::new(handle.clone(), self.spec.clone()))
    }
}

//! # ds-optimizer
//!
//! Sweep definitions and tracking for dictsweep.
//!
//! Provides sweep specifications, search strategies (grid, random, bayes),
//! trial and sweep lifecycle records, the [`Tracker`] collaborator interface
//! with an in-process [`LocalTracker`], and the built-in configuration set.

mod local;
mod presets;
mod search;
mod tracker;
mod trial;

pub use local::{LocalTracker, DEFAULT_EXPLORATION_WEIGHT, DEFAULT_GRID_FLOAT_STEPS};
pub use presets::{default_training_options, ensemble_sweep};
pub use search::{
    BayesianSearch, Goal, GridSearch, LogUniformTag, MetricTarget, ParameterSpec, RandomSearch,
    SearchStrategy, SweepMethod, SweepSpecification,
};
pub use tracker::{RunOutcome, Tracker, TrackerIdentity, TrialAssignment};
pub use trial::{
    RunContext, SweepHandle, SweepState, SweepStatus, Trial, TrialResult, TrialStatus,
};

//! # ds-runner
//!
//! Drives the external training program: release build, one invocation per
//! configuration, and sweeps of such runs against a [`Tracker`].
//!
//! [`Tracker`]: ds_optimizer::Tracker

pub mod compile;
pub mod coordinator;
pub mod invocation;
pub mod launcher;
pub mod settings;
pub mod sweep;

#[cfg(test)]
mod testing;

pub use compile::{BuildPolicy, BuildStep, DEFAULT_BUILD_COMMAND};
pub use coordinator::RunCoordinator;
pub use invocation::{InvocationClient, ResultFraming, TRAIN_MARKER};
pub use launcher::{LaunchError, LaunchOutput, LaunchRequest, ProcessLauncher, TokioLauncher};
pub use settings::{parse_override, Settings};
pub use sweep::{StopReason, SweepCoordinator, SweepPhase, SweepSummary, TrialFailurePolicy};

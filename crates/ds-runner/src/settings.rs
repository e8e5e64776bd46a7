use ds_optimizer::TrackerIdentity;
use ds_types::{config_error, DsResult, ParamValue};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::compile::DEFAULT_BUILD_COMMAND;

pub const TRAIN_BIN_VAR: &str = "TRAIN_BIN";
pub const PROJECT_VAR: &str = "TRACKING_PROJECT";
pub const ENTITY_VAR: &str = "TRACKING_ENTITY";
pub const REPO_ROOT_VAR: &str = "DICTSWEEP_REPO_ROOT";
pub const BUILD_COMMAND_VAR: &str = "DICTSWEEP_BUILD_COMMAND";
pub const BUILD_TIMEOUT_VAR: &str = "DICTSWEEP_BUILD_TIMEOUT_SECS";
pub const TRAIN_TIMEOUT_VAR: &str = "DICTSWEEP_TRAIN_TIMEOUT_SECS";
pub const STATE_DIR_VAR: &str = "DICTSWEEP_STATE";

/// Directory of the local tracker ledger when none is configured.
pub const DEFAULT_STATE_DIR: &str = ".dictsweep";

/// Startup settings read from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub train_bin: PathBuf,
    pub identity: TrackerIdentity,
    pub repo_root: PathBuf,
    pub build_command: Vec<String>,
    /// `None` waits for the build however long it takes.
    pub build_timeout: Option<Duration>,
    /// `None` waits for the training program however long it takes.
    pub train_timeout: Option<Duration>,
    pub state_dir: PathBuf,
}

impl Settings {
    /// Load from the process environment. Call `dotenvy::dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> DsResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load through an arbitrary variable lookup. Missing or blank required
    /// variables are fatal.
    pub fn from_lookup<F>(lookup: F) -> DsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |name: &str| {
            var(name).ok_or_else(|| config_error!("{} environment variable not set", name))
        };
        let timeout = |name: &str| -> DsResult<Option<Duration>> {
            match var(name) {
                None => Ok(None),
                Some(raw) => raw
                    .parse::<u64>()
                    .map(|secs| Some(Duration::from_secs(secs)))
                    .map_err(|_| config_error!("{} must be a whole number of seconds, got {:?}", name, raw)),
            }
        };

        let train_bin = PathBuf::from(required(TRAIN_BIN_VAR)?);
        let identity = TrackerIdentity::new(required(PROJECT_VAR)?, required(ENTITY_VAR)?);

        let build_command = var(BUILD_COMMAND_VAR)
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect());

        Ok(Self {
            train_bin,
            identity,
            repo_root: var(REPO_ROOT_VAR).map(PathBuf::from).unwrap_or_else(|| PathBuf::from(".")),
            build_command,
            build_timeout: timeout(BUILD_TIMEOUT_VAR)?,
            train_timeout: timeout(TRAIN_TIMEOUT_VAR)?,
            state_dir: var(STATE_DIR_VAR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
        })
    }
}

/// Parse a `key=value` override from the command line. The value is read
/// as an integer, then a finite float, else kept as text.
pub fn parse_override(raw: &str) -> Result<(String, ParamValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in {raw:?}"));
    }
    Ok((key.to_string(), ParamValue::parse_literal(value.trim())))
}

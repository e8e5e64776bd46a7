use thiserror::Error;

/// Main error type for dictsweep
#[derive(Error, Debug)]
pub enum DsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    #[error("Invocation error: {0}")]
    Invocation(#[from] InvocationError),

    #[error("Tracking error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Failures of the optimized build that precedes every run
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("build exited with status {status:?}:\n{stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("build timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("could not run build tool {program}: {message}")]
    Launch { program: String, message: String },
}

/// Failures of a single request/response cycle against the training program
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("training program exited with status {status:?}:\n{stderr}")]
    Failed { status: Option<i32>, stderr: String },

    #[error("training program produced no output")]
    EmptyOutput,

    /// `line` is decoded lossily: bytes that are not UTF-8 show up as U+FFFD.
    #[error("last line of output is not a valid result: {line}")]
    MalformedResult { line: String },

    #[error("training program timed out after {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    #[error("could not run training program {program}: {message}")]
    Launch { program: String, message: String },

    #[error("could not encode configuration: {message}")]
    Encode { message: String },
}

/// Failures reported by the tracking collaborator
#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Sweep not found: {sweep_id}")]
    SweepNotFound { sweep_id: String },

    #[error("Run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("Run already finished: {run_id}")]
    RunAlreadyFinished { run_id: String },

    #[error("Sweep registration failed: {message}")]
    RegistrationFailed { message: String },

    #[error("Tracker state unavailable: {message}")]
    StateUnavailable { message: String },
}

impl DsError {
    /// Captured diagnostic text of the external process, if this error carries one.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            DsError::Build(BuildError::Failed { stderr, .. })
            | DsError::Invocation(InvocationError::Failed { stderr, .. }) => Some(stderr.as_str()),
            DsError::Invocation(InvocationError::MalformedResult { line }) => Some(line.as_str()),
            _ => None,
        }
    }
}

/// Result type alias for dictsweep operations
pub type DsResult<T> = Result<T, DsError>;

/// Macro for creating validation errors
#[macro_export]
macro_rules! validation_error {
    ($($arg:tt)*) => {
        $crate::DsError::Validation(format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::DsError::Config(format!($($arg)*))
    };
}

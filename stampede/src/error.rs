use stampede_core::{ConfigError, EXIT_INVALID_CONFIG, EXIT_SCHEDULER_FAULT};
use thiserror::Error;

/// Failures which prevent a run from producing a report.
///
/// Failed thresholds are not errors; they show up in [`RunReport`](stampede_core::RunReport).
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No HTTP executor configured. Set one with `LoadTest::executor` or enable the `reqwest` feature.")]
    MissingExecutor,

    #[error("Scheduler fault: {0}")]
    SchedulerFault(String),
}

impl RunError {
    /// Process exit status, following k6's codes.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunError::Config(_) | RunError::MissingExecutor => EXIT_INVALID_CONFIG,
            RunError::SchedulerFault(_) => EXIT_SCHEDULER_FAULT,
        }
    }
}

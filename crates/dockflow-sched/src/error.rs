//! Error types for job scheduling.

use dockflow_core::ModuleError;
use thiserror::Error;

/// Errors produced while building or running an execution engine.
///
/// A job that runs but produces no output is not an error here; it shows
/// up as a [`crate::JobOutcome`] with `produced == false`.
#[derive(Debug, Error)]
pub enum SchedError {
    /// The requested engine mode does not exist.
    #[error("Scheduler `mode` {mode:?} not recognized. Available options are {available}")]
    UnknownMode { mode: String, available: String },

    /// An engine parameter is missing or out of range.
    #[error("invalid engine parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    /// The batch queue refused a submission.
    #[error("queue submission failed: {0}")]
    Submission(String),

    /// The batch queue could not be queried.
    #[error("queue status query failed for job {job_id}: {reason}")]
    Status { job_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, SchedError>;

impl From<ModuleError> for SchedError {
    fn from(err: ModuleError) -> Self {
        match err {
            ModuleError::InvalidParameter { name, reason } => {
                SchedError::InvalidParameter { name, reason }
            }
            other => SchedError::InvalidParameter {
                name: "<params>".to_string(),
                reason: other.to_string(),
            },
        }
    }
}

impl From<SchedError> for ModuleError {
    fn from(err: SchedError) -> Self {
        ModuleError::Engine(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_mode_lists_available() {
        let err = SchedError::UnknownMode {
            mode: "bogus".to_string(),
            available: "hpc, local".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("\"bogus\""));
        assert!(msg.contains("hpc, local"));
    }

    #[test]
    fn test_parameter_errors_keep_their_name() {
        let err: SchedError = ModuleError::InvalidParameter {
            name: "ncores".to_string(),
            reason: "expected an integer, got a string".to_string(),
        }
        .into();
        assert!(err.to_string().contains("`ncores`"));

        let module_err: ModuleError = err.into();
        assert!(module_err.to_string().starts_with("engine error"));
    }
}

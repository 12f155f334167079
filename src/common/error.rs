use thiserror::Error;

use crate::scheduler::JobId;

/// Exit code used for timeouts, immediate job failures and other
/// local errors.
pub const GENERIC_ERROR_EXIT_CODE: i32 = 1;

/// Exit code reported after an interrupt-triggered abort (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

#[derive(Debug, Error)]
pub enum QshellError {
    /// Malformed flag or configuration value. Reported before any
    /// scheduler interaction happens.
    #[error("Invalid input: {0}")]
    UserInput(String),

    /// The scheduler rejected the allocation request outright.
    #[error("The scheduler rejected the submission: {message}")]
    SubmissionFailed { code: i32, message: String },

    /// The job reached a failure state before it ever left the queue.
    #[error(
        "Job {job_id} failed while still queued (status: {status}). \
         This usually indicates a cluster problem; contact your administrators."
    )]
    JobFailedEarly { job_id: JobId, status: String },

    /// The session did not become ready within the configured window.
    #[error(
        "Job {job_id} did not start within {waited}s (last status: {last_status}). \
         The cluster may just be busy; consider raising the startup timeout."
    )]
    StartupTimeout {
        job_id: JobId,
        waited: u64,
        last_status: String,
    },

    /// The user asked us to stop while a job was outstanding.
    #[error("Interrupted while waiting for the session")]
    Interrupted,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QshellError {
    /// Process exit code for this failure. Submission failures keep the
    /// scheduler's own code; interrupts keep the conventional 130.
    pub fn exit_code(&self) -> i32 {
        match self {
            QshellError::SubmissionFailed { code, .. } if *code != 0 => *code,
            QshellError::Interrupted => INTERRUPTED_EXIT_CODE,
            _ => GENERIC_ERROR_EXIT_CODE,
        }
    }
}

impl From<String> for QshellError {
    fn from(message: String) -> Self {
        QshellError::UserInput(message)
    }
}

pub mod slurm;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;

use crate::session::request::AllocationRequest;

/// Opaque scheduler-side job identifier.
pub type JobId = String;

/// Name of the node an allocation runs on.
pub type NodeId = String;

/// Handle to a submitted placeholder job. Owned by the session for the
/// lifetime of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    job_id: JobId,
}

impl JobHandle {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }

    pub fn id(&self) -> &str {
        &self.job_id
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.job_id.fmt(f)
    }
}

/// Scheduler-reported job state, reduced to the vocabulary the session
/// machine needs. States we cannot classify are kept verbatim in `Other`
/// and treated as still-pending; the startup timeout bounds the wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    /// The job left the queue but is not running yet (node boot etc.).
    Starting,
    Running,
    /// Terminal state; the placeholder can no longer host a session.
    Failed(String),
    Other(String),
}

impl JobStatus {
    pub fn is_failed(&self) -> bool {
        matches!(self, JobStatus::Failed(_))
    }

    /// Whether the job has left the queue according to the scheduler.
    pub fn has_left_queue(&self) -> bool {
        matches!(self, JobStatus::Starting | JobStatus::Running)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            JobStatus::Pending => f.write_str("PENDING"),
            JobStatus::Starting => f.write_str("STARTING"),
            JobStatus::Running => f.write_str("RUNNING"),
            JobStatus::Failed(raw) | JobStatus::Other(raw) => f.write_str(raw),
        }
    }
}

/// One node-state sample. Re-fetched every poll, never cached.
#[derive(Debug, Clone, Default)]
pub struct NodeObservation {
    /// Node is currently booting.
    pub powering_up: bool,
    /// Node is switched off by power saving and needs a boot.
    pub power_saving: bool,
    /// Raw scheduler state tags, for diagnostics.
    pub tags: Vec<String>,
}

impl NodeObservation {
    /// The node is physically usable: neither power marker is present.
    pub fn booted(&self) -> bool {
        !self.powering_up && !self.power_saving
    }
}

/// The scheduler rejected a submission. Carries the submitter's exit
/// code so the process can exit with it.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct SubmitError {
    pub code: i32,
    pub message: String,
}

/// Narrow interface the session machine needs from a batch scheduler.
/// Free-text output parsing lives entirely inside implementations.
#[allow(async_fn_in_trait)]
pub trait SchedulerClient {
    /// Submit a placeholder allocation and return its job handle.
    async fn submit(&mut self, request: &AllocationRequest) -> Result<JobHandle, SubmitError>;

    async fn job_status(&mut self, job: &JobHandle) -> anyhow::Result<JobStatus>;

    /// Node assigned to the job, or `None` while not yet assigned.
    /// Once communicated, the assignment is stable.
    async fn allocated_node(&mut self, job: &JobHandle) -> anyhow::Result<Option<NodeId>>;

    async fn node_state(&mut self, node: &NodeId) -> anyhow::Result<NodeObservation>;

    /// Cancel the job. Idempotent: cancelling an already-finished or
    /// already-cancelled job is not an error.
    async fn cancel(&mut self, job: &JobHandle) -> anyhow::Result<()>;
}

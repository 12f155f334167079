use std::time::Duration;

use tokio::time::sleep;

use crate::scheduler::{JobHandle, SchedulerClient};

/// Route a session outcome through the guard: a success passes through
/// with the guard still armed, any failure cancels the outstanding job
/// before the original error is surfaced. Cancellation never replaces
/// the error, so the exit code keeps reflecting the original cause.
pub async fn ensure_cleanup<S: SchedulerClient, T>(
    guard: &mut CleanupGuard,
    scheduler: &mut S,
    outcome: crate::Result<T>,
) -> crate::Result<T> {
    match outcome {
        Ok(value) => Ok(value),
        Err(error) => {
            guard.cancel_owned_job(scheduler).await;
            Err(error)
        }
    }
}

/// Grace delay before cancellation, to avoid racing a scheduler update
/// that is still in flight.
pub const CANCEL_GRACE: Duration = Duration::from_secs(2);

/// Ensures the placeholder job is not orphaned. Armed as soon as a job
/// handle exists; disarmed on a clean exit (a completed interactive job
/// terminates on its own). On every other exit path `cancel_owned_job`
/// cancels the job best-effort: failures are logged, never escalated,
/// so the process exit code always reflects the original cause.
pub struct CleanupGuard {
    job: Option<JobHandle>,
    grace: Duration,
}

impl CleanupGuard {
    pub fn new(job: JobHandle) -> Self {
        Self {
            job: Some(job),
            grace: CANCEL_GRACE,
        }
    }

    #[cfg(test)]
    fn with_grace(job: JobHandle, grace: Duration) -> Self {
        Self {
            job: Some(job),
            grace,
        }
    }

    /// The session ended cleanly; the job will finish on its own.
    pub fn disarm(&mut self) {
        self.job = None;
    }

    /// Cancel the outstanding job, if any. Safe to call more than once:
    /// the handle is taken on the first call, so racing termination
    /// paths trigger at most one cancellation.
    pub async fn cancel_owned_job<S: SchedulerClient>(&mut self, scheduler: &mut S) {
        let Some(job) = self.job.take() else {
            return;
        };
        sleep(self.grace).await;
        log::info!("Cancelling job {job}");
        if let Err(error) = scheduler.cancel(&job).await {
            log::warn!("Cancelling job {job} failed: {error:?}");
        }
    }
}

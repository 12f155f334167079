use std::time::Duration;

use tokio::time::sleep;

use crate::common::error::QshellError;
use crate::scheduler::{JobHandle, JobStatus, NodeId, SchedulerClient};
use crate::session::report::Reporter;
use crate::session::request::AllocationRequest;

/// Fixed poll cadence: one job-state observation per second, bounded,
/// never busy-polled.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Submitting,
    Pending,
    PoweringUp,
    Ready,
    Failed,
    TimedOut,
    Cancelled,
}

/// Successful outcome of the waiting phase: the job is RUNNING on a
/// booted node.
#[derive(Debug, Clone)]
pub struct ReadySession {
    pub job: JobHandle,
    pub node: NodeId,
}

/// Drives a placeholder job from submission to a ready interactive
/// session. State progression is monotonic: Submitting, Pending,
/// PoweringUp, then Ready, with Failed/TimedOut as error exits. Repeated
/// ticks within Pending or PoweringUp are normal.
pub struct SessionMachine<'a, S, R> {
    scheduler: &'a mut S,
    reporter: &'a mut R,
    poll_interval: Duration,
    startup_timeout: Duration,
    state: SessionState,
}

impl<'a, S: SchedulerClient, R: Reporter> SessionMachine<'a, S, R> {
    pub fn new(scheduler: &'a mut S, reporter: &'a mut R, startup_timeout: Duration) -> Self {
        Self {
            scheduler,
            reporter,
            poll_interval: POLL_INTERVAL,
            startup_timeout,
            state: SessionState::Submitting,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Records an externally-triggered cancellation (interrupt or
    /// termination request) while the session was not yet ready.
    pub fn mark_cancelled(&mut self) {
        self.state = SessionState::Cancelled;
    }

    /// Submit the placeholder allocation. A rejection is terminal and
    /// carries the scheduler's own exit code.
    pub async fn submit(&mut self, request: &AllocationRequest) -> crate::Result<JobHandle> {
        match self.scheduler.submit(request).await {
            Ok(job) => {
                self.state = SessionState::Pending;
                self.reporter.job_submitted(job.id());
                Ok(job)
            }
            Err(error) => {
                self.state = SessionState::Failed;
                Err(QshellError::SubmissionFailed {
                    code: error.code,
                    message: error.message,
                })
            }
        }
    }

    /// Poll until the session is ready or the startup timeout elapses.
    ///
    /// Each tick performs one job-state query and, once a node is
    /// assigned, one node-state query. Job-state failures take
    /// precedence (fail fast); the node-state power markers gate the
    /// PoweringUp phase. Ready requires the node to be booted AND the
    /// job to report RUNNING, in that order: a RUNNING report while the
    /// power markers are still set keeps the machine in PoweringUp.
    pub async fn wait_until_ready(&mut self, job: &JobHandle) -> crate::Result<ReadySession> {
        let mut waited = Duration::ZERO;
        let mut node: Option<NodeId> = None;
        let mut powering_notice_shown = false;

        loop {
            // The first iteration doubles as the immediate sanity check
            // after submission: a job the scheduler already rejected
            // fails here without waiting out the timeout.
            let status = self.scheduler.job_status(job).await?;

            if let JobStatus::Failed(raw) = &status {
                self.state = SessionState::Failed;
                return Err(QshellError::JobFailedEarly {
                    job_id: job.id().to_string(),
                    status: raw.clone(),
                });
            }

            if self.state == SessionState::Pending && status.has_left_queue() {
                // The allocated node is resolved exactly once; it may be
                // momentarily unassigned in the same poll transition, in
                // which case we stay Pending for one more tick.
                if let Some(assigned) = self.scheduler.allocated_node(job).await? {
                    node = Some(assigned);
                    self.state = SessionState::PoweringUp;
                }
            }

            if let (SessionState::PoweringUp, Some(node)) = (self.state, node.as_ref()) {
                let observation = self.scheduler.node_state(node).await?;
                if observation.booted() {
                    if status == JobStatus::Running {
                        self.state = SessionState::Ready;
                        self.reporter.ready(node);
                        return Ok(ReadySession {
                            job: job.clone(),
                            node: node.clone(),
                        });
                    }
                    // Node is up but the scheduler has not confirmed the
                    // job yet; keep polling.
                } else if !powering_notice_shown {
                    powering_notice_shown = true;
                    self.reporter.powering_up(node);
                }
            }

            self.reporter.progress(waited, &status);

            if waited >= self.startup_timeout {
                self.state = SessionState::TimedOut;
                return Err(QshellError::StartupTimeout {
                    job_id: job.id().to_string(),
                    waited: waited.as_secs(),
                    last_status: status.to_string(),
                });
            }

            sleep(self.poll_interval).await;
            waited += self.poll_interval;
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::scheduler::testing::{FakeScheduler, booted, power_saving, powering_up};
    use crate::session::request::ShareMode;

    #[derive(Default)]
    struct RecordingReporter {
        submitted: Vec<String>,
        notices: Vec<String>,
        ready: Vec<String>,
        ticks: usize,
    }

    impl Reporter for RecordingReporter {
        fn job_submitted(&mut self, job_id: &str) {
            self.submitted.push(job_id.to_string());
        }

        fn progress(&mut self, _waited: Duration, _status: &JobStatus) {
            self.ticks += 1;
        }

        fn powering_up(&mut self, node: &str) {
            self.notices.push(node.to_string());
        }

        fn ready(&mut self, node: &str) {
            self.ready.push(node.to_string());
        }
    }

    fn request() -> AllocationRequest {
        AllocationRequest {
            cpus: 1,
            memory_mb: 4096,
            generic_resources: None,
            node_features: None,
            partition: "interactive".to_string(),
            job_name: "qshell".to_string(),
            reservation: None,
            share_mode: ShareMode::Shared,
            time_limit: Duration::from_secs(8 * 3600),
            node: None,
        }
    }

    fn timeout(secs: u64) -> Duration {
        Duration::from_secs(secs)
    }

    #[tokio::test(start_paused = true)]
    async fn reaches_ready_without_powering_up_notice() {
        let mut scheduler = FakeScheduler::new("100")
            .with_statuses([JobStatus::Pending, JobStatus::Running])
            .with_nodes([Some("node01".to_string())])
            .with_node_states([booted()]);
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(60));
        machine.state = SessionState::Pending;

        let job = JobHandle::new("100".to_string());
        let ready = machine.wait_until_ready(&job).await.unwrap();
        assert_eq!(ready.node, "node01");
        assert_eq!(machine.state(), SessionState::Ready);
        assert!(reporter.notices.is_empty());
        assert_eq!(reporter.ready, vec!["node01".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn powering_up_notice_emitted_exactly_once() {
        // CONFIGURING with power markers set, then RUNNING while the
        // markers are still set, then markers cleared.
        let mut scheduler = FakeScheduler::new("200")
            .with_statuses([
                JobStatus::Pending,
                JobStatus::Starting,
                JobStatus::Running,
                JobStatus::Running,
            ])
            .with_nodes([Some("node07".to_string())])
            .with_node_states([powering_up(), powering_up(), booted()]);
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(60));
        machine.state = SessionState::Pending;

        let job = JobHandle::new("200".to_string());
        let ready = machine.wait_until_ready(&job).await.unwrap();
        assert_eq!(ready.node, "node07");
        assert_eq!(reporter.notices, vec!["node07".to_string()]);
        // Three waiting ticks happened before the ready one: RUNNING
        // with markers still set must not count as ready.
        assert_eq!(reporter.ticks, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn power_saving_node_blocks_readiness() {
        let mut scheduler = FakeScheduler::new("201")
            .with_statuses([JobStatus::Starting, JobStatus::Running, JobStatus::Running])
            .with_nodes([Some("node02".to_string())])
            .with_node_states([power_saving(), power_saving(), booted()]);
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(60));
        machine.state = SessionState::Pending;

        let job = JobHandle::new("201".to_string());
        let ready = machine.wait_until_ready(&job).await.unwrap();
        assert_eq!(ready.node, "node02");
        assert_eq!(reporter.notices.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fails_fast_on_immediately_failed_job() {
        let mut scheduler =
            FakeScheduler::new("300").with_statuses([JobStatus::Failed("FAILED".to_string())]);
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(600));
        machine.state = SessionState::Pending;

        let job = JobHandle::new("300".to_string());
        let error = machine.wait_until_ready(&job).await.unwrap_err();
        match error {
            QshellError::JobFailedEarly { job_id, status } => {
                assert_eq!(job_id, "300");
                assert_eq!(status, "FAILED");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(machine.state(), SessionState::Failed);
        // No full timeout wait: not a single sleep tick was needed.
        assert_eq!(reporter.ticks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_when_job_never_starts() {
        let mut scheduler = FakeScheduler::new("400").with_statuses([JobStatus::Pending]);
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(5));
        machine.state = SessionState::Pending;

        let job = JobHandle::new("400".to_string());
        let error = machine.wait_until_ready(&job).await.unwrap_err();
        match error {
            QshellError::StartupTimeout {
                ref job_id,
                waited,
                ref last_status,
            } => {
                assert_eq!(job_id, "400");
                assert_eq!(waited, 5);
                assert_eq!(last_status, "PENDING");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(machine.state(), SessionState::TimedOut);
        assert_eq!(error.exit_code(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_status_is_treated_as_still_pending() {
        let mut scheduler = FakeScheduler::new("500")
            .with_statuses([
                JobStatus::Other("REQUEUE_HOLD".to_string()),
                JobStatus::Running,
            ])
            .with_nodes([Some("node03".to_string())])
            .with_node_states([booted()]);
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(60));
        machine.state = SessionState::Pending;

        let job = JobHandle::new("500".to_string());
        let ready = machine.wait_until_ready(&job).await.unwrap();
        assert_eq!(ready.node, "node03");
    }

    #[tokio::test(start_paused = true)]
    async fn momentarily_unassigned_node_keeps_machine_pending() {
        let mut scheduler = FakeScheduler::new("600")
            .with_statuses([
                JobStatus::Starting,
                JobStatus::Starting,
                JobStatus::Running,
            ])
            .with_nodes([None, Some("node04".to_string())])
            .with_node_states([booted()]);
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(60));
        machine.state = SessionState::Pending;

        let job = JobHandle::new("600".to_string());
        let ready = machine.wait_until_ready(&job).await.unwrap();
        assert_eq!(ready.node, "node04");
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_acquisition_scenario() {
        // submit -> 5740; PENDING; CONFIGURING with node07 powering up;
        // markers cleared and RUNNING -> ready on node07.
        let mut scheduler = FakeScheduler::new("5740")
            .with_statuses([JobStatus::Pending, JobStatus::Starting, JobStatus::Running])
            .with_nodes([Some("node07".to_string())])
            .with_node_states([powering_up(), booted()]);
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(300));

        let job = machine.submit(&request()).await.unwrap();
        assert_eq!(job.id(), "5740");

        let ready = machine.wait_until_ready(&job).await.unwrap();
        assert_eq!(ready.node, "node07");
        assert_eq!(reporter.submitted, vec!["5740".to_string()]);
        assert_eq!(reporter.notices, vec!["node07".to_string()]);
        assert_eq!(
            crate::connect::session_token(ready.job.id()),
            "session5740"
        );
        let ssh_args = crate::connect::build_ssh_args(&ready);
        assert!(ssh_args.contains(&"node07".to_string()));
        assert!(ssh_args.iter().any(|arg| arg.contains("session5740")));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_keeps_scheduler_exit_code() {
        let mut scheduler = FakeScheduler::new("700");
        scheduler.submit_error = Some(crate::scheduler::SubmitError {
            code: 64,
            message: "sbatch: error: Invalid partition name".to_string(),
        });
        let mut reporter = RecordingReporter::default();
        let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, timeout(60));

        let error = machine.submit(&request()).await.unwrap_err();
        assert_eq!(error.exit_code(), 64);
        assert_eq!(machine.state(), SessionState::Failed);
        assert!(reporter.submitted.is_empty());
    }
}

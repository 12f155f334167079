use std::collections::VecDeque;

use crate::scheduler::{
    JobHandle, JobId, JobStatus, NodeId, NodeObservation, SchedulerClient, SubmitError,
};
use crate::session::request::AllocationRequest;

/// Scripted scheduler for state machine tests. Each query pops the next
/// scripted answer; an exhausted script repeats its last answer.
pub(crate) struct FakeScheduler {
    pub job_id: String,
    pub statuses: VecDeque<JobStatus>,
    pub nodes: VecDeque<Option<NodeId>>,
    pub node_states: VecDeque<NodeObservation>,
    pub cancelled: Vec<JobId>,
    pub submit_error: Option<SubmitError>,
    last_status: JobStatus,
    last_node: Option<NodeId>,
    last_node_state: NodeObservation,
}

impl FakeScheduler {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            statuses: VecDeque::new(),
            nodes: VecDeque::new(),
            node_states: VecDeque::new(),
            cancelled: Vec::new(),
            submit_error: None,
            last_status: JobStatus::Pending,
            last_node: None,
            last_node_state: NodeObservation::default(),
        }
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    pub fn with_nodes(mut self, nodes: impl IntoIterator<Item = Option<NodeId>>) -> Self {
        self.nodes = nodes.into_iter().collect();
        self
    }

    pub fn with_node_states(
        mut self,
        states: impl IntoIterator<Item = NodeObservation>,
    ) -> Self {
        self.node_states = states.into_iter().collect();
        self
    }
}

impl SchedulerClient for FakeScheduler {
    async fn submit(&mut self, _request: &AllocationRequest) -> Result<JobHandle, SubmitError> {
        match self.submit_error.take() {
            Some(error) => Err(error),
            None => Ok(JobHandle::new(self.job_id.clone())),
        }
    }

    async fn job_status(&mut self, _job: &JobHandle) -> anyhow::Result<JobStatus> {
        if let Some(status) = self.statuses.pop_front() {
            self.last_status = status;
        }
        Ok(self.last_status.clone())
    }

    async fn allocated_node(&mut self, _job: &JobHandle) -> anyhow::Result<Option<NodeId>> {
        if let Some(node) = self.nodes.pop_front() {
            self.last_node = node;
        }
        Ok(self.last_node.clone())
    }

    async fn node_state(&mut self, _node: &NodeId) -> anyhow::Result<NodeObservation> {
        if let Some(state) = self.node_states.pop_front() {
            self.last_node_state = state;
        }
        Ok(self.last_node_state.clone())
    }

    async fn cancel(&mut self, job: &JobHandle) -> anyhow::Result<()> {
        self.cancelled.push(job.id().to_string());
        Ok(())
    }
}

pub(crate) fn powering_up() -> NodeObservation {
    NodeObservation {
        powering_up: true,
        power_saving: false,
        tags: vec!["IDLE".to_string(), "POWERING_UP".to_string()],
    }
}

pub(crate) fn power_saving() -> NodeObservation {
    NodeObservation {
        powering_up: false,
        power_saving: true,
        tags: vec!["IDLE".to_string(), "POWERED_DOWN".to_string()],
    }
}

pub(crate) fn booted() -> NodeObservation {
    NodeObservation {
        tags: vec!["ALLOCATED".to_string()],
        ..Default::default()
    }
}

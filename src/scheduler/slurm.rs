use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Output;
use std::time::Duration;

use anyhow::Context;
use bstr::ByteSlice;
use tokio::process::Command;

use crate::scheduler::{
    JobHandle, JobStatus, NodeId, NodeObservation, SchedulerClient, SubmitError,
};
use crate::session::request::{AllocationRequest, ShareMode};

/// Worker script submitted as the placeholder job body. It only has to
/// keep the allocation alive until the interactive session ends.
pub const DEFAULT_SESSION_SCRIPT: &str = "/usr/share/qshell/qshell-session.sh";

pub struct SlurmClient {
    session_script: PathBuf,
}

impl SlurmClient {
    pub fn new() -> Self {
        Self {
            session_script: PathBuf::from(DEFAULT_SESSION_SCRIPT),
        }
    }

    pub fn with_session_script(session_script: PathBuf) -> Self {
        Self { session_script }
    }

    /// Generic resource types currently configured on the cluster.
    /// Display-only; requests are never validated against this list.
    pub async fn generic_resources(&self) -> anyhow::Result<Vec<String>> {
        self.sinfo_column("%G").await
    }

    /// Node feature tags currently configured on the cluster.
    pub async fn node_features(&self) -> anyhow::Result<Vec<String>> {
        self.sinfo_column("%f").await
    }

    async fn sinfo_column(&self, format: &str) -> anyhow::Result<Vec<String>> {
        let arguments = vec!["sinfo", "--noheader", "-o", format];
        log::debug!("Running Slurm command `{}`", arguments.join(" "));
        let output = create_command(arguments).output().await.context("sinfo start failed")?;
        let output = check_command_output(output).context("sinfo execution failed")?;
        let output = output
            .stdout
            .to_str()
            .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in sinfo output: {e:?}"))?;
        Ok(parse_sinfo_column(output))
    }
}

impl Default for SlurmClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerClient for SlurmClient {
    async fn submit(&mut self, request: &AllocationRequest) -> Result<JobHandle, SubmitError> {
        let args = build_sbatch_args(request, &self.session_script);
        log::debug!("Running Slurm command `sbatch {}`", args.join(" "));

        let mut command = Command::new("sbatch");
        command.args(&args);
        let output = command.output().await.map_err(|e| SubmitError {
            code: 1,
            message: format!("sbatch start failed: {e}"),
        })?;

        if !output.status.success() {
            return Err(SubmitError {
                code: output.status.code().unwrap_or(1),
                message: format!(
                    "{}\n{}",
                    output.stderr.to_str_lossy().trim(),
                    output.stdout.to_str_lossy().trim()
                )
                .trim()
                .to_string(),
            });
        }

        let stdout = output.stdout.to_str_lossy();
        parse_sbatch_job_id(&stdout)
            .map(JobHandle::new)
            .ok_or_else(|| SubmitError {
                code: 1,
                message: format!("Missing job id in sbatch output\n{stdout}"),
            })
    }

    async fn job_status(&mut self, job: &JobHandle) -> anyhow::Result<JobStatus> {
        let items = self.scontrol_show("job", job.id()).await?;
        parse_job_status(&items)
    }

    async fn allocated_node(&mut self, job: &JobHandle) -> anyhow::Result<Option<NodeId>> {
        let items = self.scontrol_show("job", job.id()).await?;
        Ok(parse_allocated_node(&items))
    }

    async fn node_state(&mut self, node: &NodeId) -> anyhow::Result<NodeObservation> {
        let items = self.scontrol_show("node", node).await?;
        let state = items
            .get("State")
            .ok_or_else(|| anyhow::anyhow!("Missing State in scontrol node output"))?;
        Ok(parse_node_observation(state))
    }

    async fn cancel(&mut self, job: &JobHandle) -> anyhow::Result<()> {
        let arguments = vec!["scancel", job.id()];
        log::debug!("Running Slurm command `{}`", arguments.join(" "));
        let output = create_command(arguments).output().await.context("scancel start failed")?;

        if !output.status.success() {
            let stderr = output.stderr.to_str_lossy();
            // A job that already finished is a successful cancellation.
            if stderr.contains("Invalid job id") || stderr.contains("already completing") {
                log::debug!("scancel on finished job {job}: {}", stderr.trim());
                return Ok(());
            }
            anyhow::bail!(
                "scancel exited with {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            );
        }
        Ok(())
    }
}

impl SlurmClient {
    async fn scontrol_show(&self, entity: &str, id: &str) -> anyhow::Result<HashMap<String, String>> {
        let arguments = vec!["scontrol", "show", entity, id];
        log::debug!("Running Slurm command `{}`", arguments.join(" "));
        let output = create_command(arguments).output().await.context("scontrol start failed")?;
        let output = check_command_output(output).context("scontrol execution failed")?;
        let output = output
            .stdout
            .to_str()
            .map_err(|e| anyhow::anyhow!("Invalid UTF-8 in scontrol output: {e:?}"))?;
        Ok(scontrol_items(output))
    }
}

fn create_command(arguments: Vec<&str>) -> Command {
    let mut command = Command::new(arguments[0]);
    command.args(&arguments[1..]);
    command
}

fn check_command_output(output: Output) -> anyhow::Result<Output> {
    let status = output.status;
    if !status.success() {
        return Err(anyhow::anyhow!(
            "Exit code: {}\nStderr: {}\nStdout: {}",
            status.code().unwrap_or(-1),
            output.stderr.to_str_lossy().trim(),
            output.stdout.to_str_lossy().trim()
        ));
    }
    Ok(output)
}

/// Format a duration as a Slurm time string, e.g. 01:05:02.
pub fn format_slurm_duration(duration: &Duration) -> String {
    let mut seconds = duration.as_secs();
    let hours = seconds / 3600;
    seconds %= 3600;
    let minutes = seconds / 60;
    seconds %= 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

fn build_sbatch_args(request: &AllocationRequest, session_script: &std::path::Path) -> Vec<String> {
    let mut args = vec![
        format!("--job-name={}", request.job_name),
        format!("--partition={}", request.partition),
        format!("--cpus-per-task={}", request.cpus),
        format!("--mem={}M", request.memory_mb),
        format!("--time={}", format_slurm_duration(&request.time_limit)),
        "--nodes=1".to_string(),
        "--output=/dev/null".to_string(),
    ];
    match request.share_mode {
        ShareMode::Shared => args.push("--oversubscribe".to_string()),
        ShareMode::Exclusive => args.push("--exclusive".to_string()),
    }
    if let Some(gres) = &request.generic_resources {
        args.push(format!("--gres={gres}"));
    }
    if let Some(features) = &request.node_features {
        args.push(format!("--constraint={features}"));
    }
    if let Some(reservation) = &request.reservation {
        args.push(format!("--reservation={reservation}"));
    }
    if let Some(node) = &request.node {
        args.push(format!("--nodelist={node}"));
    }
    args.push(session_script.display().to_string());
    args
}

/// Extract the job id from sbatch's confirmation line
/// (`Submitted batch job 5740`): the last whitespace-delimited field.
fn parse_sbatch_job_id(output: &str) -> Option<String> {
    output
        .lines()
        .map(|l| l.trim())
        .find(|l| l.to_lowercase().starts_with("submitted batch job"))
        .and_then(|l| l.split_whitespace().next_back())
        .map(|id| id.to_string())
}

/// Parse <key>=<value> pairs from `scontrol show job|node <id>` output.
fn scontrol_items(output: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in output.lines() {
        for item in line.trim().split(' ') {
            let mut iter = item.splitn(2, '=');
            let (Some(key), Some(value)) = (iter.next(), iter.next()) else {
                continue;
            };
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

fn parse_job_status(items: &HashMap<String, String>) -> anyhow::Result<JobStatus> {
    let state = items
        .get("JobState")
        .ok_or_else(|| anyhow::anyhow!("Missing JobState in scontrol output"))?;
    Ok(match state.as_str() {
        "PENDING" => JobStatus::Pending,
        "CONFIGURING" | "POWER_UP_NODE" => JobStatus::Starting,
        "RUNNING" => JobStatus::Running,
        // COMPLETING is already tearing down and can no longer host a
        // session, same as the fully terminal states.
        "FAILED" | "CANCELLED" | "TIMEOUT" | "NODE_FAIL" | "BOOT_FAIL" | "OUT_OF_MEMORY"
        | "DEADLINE" | "PREEMPTED" | "COMPLETED" | "COMPLETING" => {
            JobStatus::Failed(state.clone())
        }
        // Conservatively keep waiting on anything unrecognized; the
        // startup timeout bounds the wait.
        other => JobStatus::Other(other.to_string()),
    })
}

fn parse_allocated_node(items: &HashMap<String, String>) -> Option<NodeId> {
    items
        .get("NodeList")
        .map(|s| s.as_str())
        .filter(|s| !s.is_empty() && *s != "(null)")
        .map(|s| s.to_string())
}

/// Parse the `State=` value of `scontrol show node`. Power state is
/// encoded both as explicit flags (`IDLE+CLOUD+POWERING_UP`) and as
/// single-character suffixes on the base state (`IDLE~`, `IDLE#`).
fn parse_node_observation(state: &str) -> NodeObservation {
    let mut observation = NodeObservation::default();
    for tag in state.split('+') {
        let trimmed = tag.trim_end_matches(['~', '#', '%', '!']);
        match trimmed {
            "POWERING_UP" => observation.powering_up = true,
            "POWERED_DOWN" | "POWER_DOWN" | "POWERING_DOWN" => observation.power_saving = true,
            _ => {}
        }
        if tag.ends_with('#') {
            observation.powering_up = true;
        }
        if tag.ends_with('~') {
            observation.power_saving = true;
        }
        observation.tags.push(trimmed.to_string());
    }
    observation
}

fn parse_sinfo_column(output: &str) -> Vec<String> {
    let mut values: Vec<String> = output
        .lines()
        .flat_map(|line| line.trim().split(','))
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && *v != "(null)")
        .map(|v| v.to_string())
        .collect();
    values.sort();
    values.dedup();
    values
}

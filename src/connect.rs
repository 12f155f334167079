use std::process::ExitStatus;

use anyhow::Context;
use tokio::process::Command;

use crate::session::machine::ReadySession;

/// Marker telling the remote environment this login belongs to an
/// interactive session allocation.
pub const SESSION_MARKER: &str = "QSHELL_CONNECT=interactive";

/// Session identifier the remote side validates against its current
/// allocation, derived from the job id.
pub fn session_token(job_id: &str) -> String {
    format!("session{job_id}")
}

pub fn build_ssh_args(ready: &ReadySession) -> Vec<String> {
    vec![
        "-t".to_string(),
        ready.node.clone(),
        format!(
            "{SESSION_MARKER} QSHELL_SESSION={} exec ${{SHELL:-/bin/bash}} -l",
            session_token(ready.job.id())
        ),
    ]
}

/// Open the interactive remote connection and block until the user's
/// remote shell ends. The returned status is informational only; the
/// session already reached its terminal success state.
pub async fn open_session(ready: &ReadySession) -> anyhow::Result<ExitStatus> {
    let args = build_ssh_args(ready);
    log::debug!("Running `ssh {}`", args.join(" "));
    let status = Command::new("ssh")
        .args(&args)
        .status()
        .await
        .context("ssh start failed")?;
    Ok(status)
}

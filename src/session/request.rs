use std::time::Duration;

use crate::common::cli::SessionOpts;
use crate::common::error::QshellError;
use crate::config::Defaults;

/// Whether the allocated node may be shared with other jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareMode {
    Shared,
    Exclusive,
}

impl ShareMode {
    /// Accepts the boolean-like token spellings `yes`/`no`/`1`/`0` and
    /// case-insensitive `y`/`n`.
    pub fn parse(token: &str) -> Result<ShareMode, String> {
        match token.to_lowercase().as_str() {
            "yes" | "y" | "1" => Ok(ShareMode::Shared),
            "no" | "n" | "0" => Ok(ShareMode::Exclusive),
            _ => Err(format!(
                "`{token}` is not a valid share mode (expected yes/no/y/n/1/0)"
            )),
        }
    }
}

pub fn parse_cpu_count(value: &str) -> Result<u32, String> {
    parse_positive(value, "CPU count")
}

pub fn parse_memory_mb(value: &str) -> Result<u64, String> {
    parse_positive(value, "memory size")
}

fn parse_positive<T>(value: &str, what: &str) -> Result<T, String>
where
    T: std::str::FromStr + PartialOrd + From<u8>,
{
    let parsed: T = value
        .trim()
        .parse()
        .map_err(|_| format!("`{value}` is not a valid {what} (expected an integer)"))?;
    if parsed < T::from(1u8) {
        return Err(format!("{what} must be positive"));
    }
    Ok(parsed)
}

/// Everything the scheduler needs to allocate the placeholder job.
/// Built once per invocation, immutable afterwards.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub cpus: u32,
    pub memory_mb: u64,
    pub generic_resources: Option<String>,
    pub node_features: Option<String>,
    pub partition: String,
    pub job_name: String,
    pub reservation: Option<String>,
    pub share_mode: ShareMode,
    pub time_limit: Duration,
    /// Pin the session to a specific node.
    pub node: Option<String>,
}

impl AllocationRequest {
    /// Merge user-supplied overrides over the resolved defaults.
    /// CPU count and memory are already integer-validated by the CLI
    /// and config layers; the positivity invariant is enforced here.
    pub fn assemble(opts: &SessionOpts, defaults: &Defaults) -> crate::Result<Self> {
        let cpus = opts.cpus.unwrap_or(defaults.cpus);
        if cpus == 0 {
            return Err(QshellError::UserInput("CPU count must be positive".to_string()));
        }
        let memory_mb = opts.memory_mb.unwrap_or(defaults.memory_mb);
        if memory_mb == 0 {
            return Err(QshellError::UserInput("Memory size must be positive".to_string()));
        }

        Ok(AllocationRequest {
            cpus,
            memory_mb,
            generic_resources: opts.gres.clone(),
            node_features: opts.constraint.clone(),
            partition: opts
                .partition
                .clone()
                .unwrap_or_else(|| defaults.partition.clone()),
            job_name: opts
                .job_name
                .clone()
                .unwrap_or_else(|| defaults.job_name.clone()),
            reservation: opts.reservation.clone(),
            share_mode: opts.shared.unwrap_or(defaults.share_mode),
            time_limit: opts.time_limit.unwrap_or(defaults.time_limit),
            node: opts.node.clone(),
        })
    }
}

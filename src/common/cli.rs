use std::time::Duration;

use clap::Parser;

use crate::session::request::{ShareMode, parse_cpu_count, parse_memory_mb};

#[derive(clap::ValueEnum, Clone, Debug)]
pub enum ColorPolicy {
    /// Use colors if the stdout is detected to be a terminal.
    Auto,
    /// Always use colors.
    Always,
    /// Never use colors.
    Never,
}

#[derive(Parser, Debug)]
#[command(
    name = "qshell",
    version,
    about = "Opens an interactive shell on a compute node allocated on demand by the batch scheduler"
)]
pub struct RootOptions {
    #[command(flatten)]
    pub common: CommonOpts,

    #[command(flatten)]
    pub session: SessionOpts,
}

#[derive(Parser, Debug)]
pub struct CommonOpts {
    /// Console color policy
    #[arg(
        long,
        default_value = "auto",
        value_enum,
        global = true,
        help_heading("GLOBAL OPTIONS")
    )]
    pub colors: ColorPolicy,

    /// Enable debug logging
    #[arg(long, global = true, help_heading("GLOBAL OPTIONS"))]
    pub debug: bool,
}

#[derive(Parser, Default, Debug)]
pub struct SessionOpts {
    /// Number of CPU cores to allocate
    #[arg(short = 'c', long, value_parser = parse_cpu_count)]
    pub cpus: Option<u32>,

    /// Memory to allocate, in megabytes
    #[arg(short = 'm', long = "mem", value_name = "MB", value_parser = parse_memory_mb)]
    pub memory_mb: Option<u64>,

    /// Generic resources token passed to the scheduler, e.g. "gpu:1".
    /// Run with --help to list the types known to this cluster.
    #[arg(short = 'g', long)]
    pub gres: Option<String>,

    /// Node feature constraint expression, e.g. "avx512&ib"
    #[arg(short = 'f', long)]
    pub constraint: Option<String>,

    /// Scheduler partition to allocate in
    #[arg(short = 'p', long)]
    pub partition: Option<String>,

    /// Name of the placeholder job
    #[arg(short = 'J', long)]
    pub job_name: Option<String>,

    /// Scheduler reservation to allocate from
    #[arg(short = 'r', long)]
    pub reservation: Option<String>,

    /// Share the node with other jobs (yes/no/y/n/1/0)
    #[arg(short = 's', long, value_name = "YES|NO", value_parser = ShareMode::parse)]
    pub shared: Option<ShareMode>,

    /// Session time limit, e.g. "8h" or "45m"
    #[arg(short = 't', long = "time", value_parser = humantime::parse_duration)]
    pub time_limit: Option<Duration>,

    /// Request a specific node
    #[arg(short = 'w', long = "nodelist", value_name = "NODE")]
    pub node: Option<String>,

    /// How long to wait for the session before giving up, e.g. "5m"
    #[arg(long, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,
}

#[cfg(test)]
mod test {
    use super::*;
    use clap::error::ErrorKind;

    #[test]
    fn test_parses_session_flags() {
        let opts = RootOptions::try_parse_from([
            "qshell", "-c", "4", "--mem", "8192", "-g", "gpu:2", "-p", "gpu", "-s", "no",
            "--time", "2h", "--timeout", "10m",
        ])
        .unwrap();
        assert_eq!(opts.session.cpus, Some(4));
        assert_eq!(opts.session.memory_mb, Some(8192));
        assert_eq!(opts.session.gres.as_deref(), Some("gpu:2"));
        assert_eq!(opts.session.shared, Some(ShareMode::Exclusive));
        assert_eq!(opts.session.time_limit, Some(Duration::from_secs(7200)));
        assert_eq!(opts.session.timeout, Some(Duration::from_secs(600)));
    }

    #[test]
    fn test_invalid_values_are_rejected_at_parse_time() {
        for args in [
            vec!["qshell", "-c", "four"],
            vec!["qshell", "-c", "0"],
            vec!["qshell", "--mem=-5"],
            vec!["qshell", "-s", "maybe"],
        ] {
            let error = RootOptions::try_parse_from(args).unwrap_err();
            assert_eq!(error.kind(), ErrorKind::ValueValidation);
        }
    }
}

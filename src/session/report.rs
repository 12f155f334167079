use std::io::Write;
use std::time::Duration;

use colored::Colorize;

use crate::scheduler::JobStatus;

/// User-facing progress reporting for the session machine. Kept behind
/// a trait so tests can observe what would be printed.
pub trait Reporter {
    fn job_submitted(&mut self, job_id: &str);
    /// Called once per poll tick.
    fn progress(&mut self, waited: Duration, status: &JobStatus);
    /// Called exactly once, the first time the node is seen booting.
    fn powering_up(&mut self, node: &str);
    fn ready(&mut self, node: &str);
}

const SPINNER: &[char] = &['|', '/', '-', '\\'];

#[derive(Default)]
pub struct CliReporter {
    spinner: usize,
}

impl CliReporter {
    pub fn new() -> Self {
        Self::default()
    }

    fn clear_line(&self) {
        // \x1b[2K clears the line
        print!("\r\x1b[2K");
    }
}

impl Reporter for CliReporter {
    fn job_submitted(&mut self, job_id: &str) {
        println!(
            "{} job {}, waiting for a node",
            "Submitted".green().bold(),
            job_id.bold()
        );
    }

    fn progress(&mut self, waited: Duration, status: &JobStatus) {
        let frame = SPINNER[self.spinner % SPINNER.len()];
        self.spinner += 1;
        print!(
            "\r\x1b[2K{frame} Waiting for the session ({status}, {}s)",
            waited.as_secs()
        );
        std::io::stdout().flush().ok();
    }

    fn powering_up(&mut self, node: &str) {
        self.clear_line();
        println!(
            "{}",
            format!("Node {node} is powering up, this can take several minutes").yellow()
        );
    }

    fn ready(&mut self, node: &str) {
        self.clear_line();
        println!("{} node {}", "Connecting to".green().bold(), node.bold());
    }
}

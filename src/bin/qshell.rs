use anyhow::Context;
use clap::Parser;
use clap::error::ErrorKind;
use colored::Colorize;
use tokio::signal::unix::{SignalKind, signal};

use qshell::common::cli::{ColorPolicy, RootOptions};
use qshell::common::error::QshellError;
use qshell::common::setup::setup_logging;
use qshell::config::Defaults;
use qshell::connect;
use qshell::scheduler::slurm::SlurmClient;
use qshell::session::cleanup::{CleanupGuard, ensure_cleanup};
use qshell::session::machine::SessionMachine;
use qshell::session::report::CliReporter;
use qshell::session::request::AllocationRequest;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let opts = match RootOptions::try_parse() {
        Ok(opts) => opts,
        Err(error) if error.kind() == ErrorKind::DisplayHelp => {
            let _ = error.print();
            print_scheduler_vocabulary().await;
            return;
        }
        Err(error) => error.exit(),
    };

    setup_logging(opts.common.debug);
    match opts.common.colors {
        ColorPolicy::Auto => {}
        ColorPolicy::Always => colored::control::set_override(true),
        ColorPolicy::Never => colored::control::set_override(false),
    }

    if let Err(error) = run(opts).await {
        eprintln!("{} {}", "Error:".red().bold(), error);
        std::process::exit(error.exit_code());
    }
}

async fn run(opts: RootOptions) -> qshell::Result<()> {
    let defaults = Defaults::load()?;
    let startup_timeout = opts.session.timeout.unwrap_or(defaults.startup_timeout);
    let request = AllocationRequest::assemble(&opts.session, &defaults)?;

    let mut scheduler = SlurmClient::new();
    let mut reporter = CliReporter::new();
    let mut machine = SessionMachine::new(&mut scheduler, &mut reporter, startup_timeout);

    // Installed before submission so a handler failure cannot leave an
    // already-submitted job without cleanup.
    let mut interrupt = std::pin::pin!(tokio::signal::ctrl_c());
    let mut terminate = signal(SignalKind::terminate())
        .context("cannot install termination signal handler")?;

    let job = machine.submit(&request).await?;
    let mut guard = CleanupGuard::new(job.clone());

    let waited = tokio::select! {
        result = machine.wait_until_ready(&job) => result,
        _ = &mut interrupt => {
            eprintln!();
            log::warn!("Interrupt received, cancelling job {job}");
            Err(QshellError::Interrupted)
        }
        _ = terminate.recv() => {
            eprintln!();
            log::warn!("Termination signal received, cancelling job {job}");
            Err(QshellError::Interrupted)
        }
    };
    if matches!(waited, Err(QshellError::Interrupted)) {
        machine.mark_cancelled();
    }

    let ready = ensure_cleanup(&mut guard, &mut scheduler, waited).await?;
    let status = ensure_cleanup(
        &mut guard,
        &mut scheduler,
        connect::open_session(&ready).await.map_err(QshellError::from),
    )
    .await?;

    // The completed interactive job terminates on its own.
    guard.disarm();
    log::debug!("Remote session ended with {status}");
    Ok(())
}

/// Printed after the normal help text: the generic-resource and node
/// feature vocabularies currently configured on the cluster. Display
/// only, best effort; requests are not validated against these.
async fn print_scheduler_vocabulary() {
    let client = SlurmClient::new();

    match client.generic_resources().await {
        Ok(gres) if !gres.is_empty() => {
            println!("\n{}", "Generic resources on this cluster:".bold());
            for value in gres {
                println!("  {value}");
            }
        }
        Ok(_) => {}
        Err(error) => log::debug!("Cannot query generic resources: {error:?}"),
    }

    match client.node_features().await {
        Ok(features) if !features.is_empty() => {
            println!("\n{}", "Node features on this cluster:".bold());
            for value in features {
                println!("  {value}");
            }
        }
        Ok(_) => {}
        Err(error) => log::debug!("Cannot query node features: {error:?}"),
    }
}

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;

use clap::Parser;

use ace::config::Config;
use ace::supervisor::Supervisor;
use ace::vcs::{ShellReviewTool, ShellSummarizer, ShellVcs};

/// Continuous supervisor loop over all ChangeSpec project files.
#[derive(Debug, Parser)]
#[command(name = "ace-loop", version, about)]
struct Cli {
    /// Seconds between full check cycles.
    #[arg(long)]
    interval: Option<u64>,

    /// Seconds between fast hook/workflow check cycles.
    #[arg(long)]
    hook_interval: Option<u64>,

    /// Show debug-level detail for skipped records and probes.
    #[arg(long, short)]
    verbose: bool,

    /// Override the state root (default: ~/.gai).
    #[arg(long, value_name = "DIR")]
    gai_home: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(if cli.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    });
    builder.init();

    let mut config = match Config::load(cli.gai_home) {
        Ok(config) => config,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(interval) = cli.interval {
        config.interval_seconds = interval;
    }
    if let Some(hook_interval) = cli.hook_interval {
        config.hook_interval_seconds = hook_interval;
    }

    let mut supervisor = Supervisor::new(
        config,
        Box::new(ShellVcs),
        Box::new(ShellReviewTool),
        Box::new(ShellSummarizer),
    );

    // SIGINT flips the flag; the loop notices and exits cleanly with 0.
    #[cfg(unix)]
    {
        let flag = supervisor.shutdown_flag();
        if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGINT, flag) {
            log::error!("failed to register SIGINT handler: {e}");
            return ExitCode::FAILURE;
        }
        let flag = supervisor.shutdown_flag();
        if let Err(e) = signal_hook::flag::register(signal_hook::consts::SIGTERM, flag) {
            log::error!("failed to register SIGTERM handler: {e}");
            return ExitCode::FAILURE;
        }
    }

    match supervisor.run() {
        Ok(()) => {
            // Distinguish clean shutdown in logs; the exit code is 0
            // either way.
            if supervisor.shutdown_flag().load(Ordering::Relaxed) {
                log::debug!("shutdown flag observed");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("supervisor loop failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}

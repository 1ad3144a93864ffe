use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use ringbench::config::{Cli, Command, TransportKind};
use ringbench::error::{BenchError, ConfigError};
use ringbench::harness::{
    ConsumerLaunch, RunConfig, run_consumer_process, run_process_driver, run_threads,
};
use ringbench_primitives::default_segment_dir;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(Cli::parse().command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("ringbench: {error}");
            let mut source = std::error::Error::source(&error);
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

fn run(command: Command) -> Result<(), BenchError> {
    match command {
        Command::Run {
            bench,
            transport,
            runs,
            segment_dir,
        } => {
            if runs == 0 {
                return Err(ConfigError::ZeroRuns.into());
            }
            let config = bench.into_config()?;
            let dir = segment_dir.unwrap_or_else(default_segment_dir);
            for run in 0..runs {
                match transport {
                    TransportKind::Thread => report(run_threads(&config)?)?,
                    TransportKind::Process => run_spawned(&config, &dir, run)?,
                }
            }
            Ok(())
        }
        Command::Producer { bench, segment } => {
            let config = bench.into_config()?;
            report(run_process_driver(&config, &segment, ConsumerLaunch::External)?)
        }
        Command::Consumer { segment, core } => run_consumer_process(&segment, core),
    }
}

fn run_spawned(config: &RunConfig, dir: &Path, run: u32) -> Result<(), BenchError> {
    let exe = std::env::current_exe().map_err(ringbench::SetupError::Spawn)?;
    let segment: PathBuf = dir.join(format!("ringbench-{}-{run}", std::process::id()));
    report(run_process_driver(config, &segment, ConsumerLaunch::Spawn(exe))?)
}

/// Print the timing line first, then fail on anything found afterwards.
fn report(outcome: ringbench::RunOutcome) -> Result<(), BenchError> {
    println!("{}", outcome.report);
    outcome.verify()
}

mod cli;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands};
use plugkeeper::agent::{Agent, summary_line};
use plugkeeper::bootstrap;
use plugkeeper::config::Config;
use plugkeeper::observability;
use plugkeeper::tasks::{CohortSummary, Outcome};

fn main() -> ExitCode {
    // Runs before anything else: a staged self-update replaces and relaunches this binary.
    if let Some(code) = bootstrap::run_if_staged() {
        return code;
    }

    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => Config::load_from_path(path.clone()),
        None => Config::load(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(err) => {
            eprintln!("plugkeeper: {}", err);
            return ExitCode::FAILURE;
        }
    };
    observability::init_tracing(&config.logging.level);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    let code = runtime.block_on(run(cli.command(), config));
    // The local console reader may still be parked on stdin.
    runtime.shutdown_timeout(Duration::from_secs(1));
    code
}

async fn run(command: Commands, config: Config) -> ExitCode {
    let agent = match Agent::new(config) {
        Ok(agent) => Arc::new(agent),
        Err(err) => {
            tracing::error!(error = %err, "Failed to start plugkeeper");
            return ExitCode::FAILURE;
        }
    };

    match command {
        Commands::Run => {
            agent.run().await;
            ExitCode::SUCCESS
        }
        Commands::Check => {
            agent.connect().await;
            exit_code(agent.run_update_cohort().await)
        }
        Commands::Backup => exit_code(agent.run_backup_cohort().await),
    }
}

fn exit_code(summary: Option<CohortSummary>) -> ExitCode {
    match summary {
        Some(summary) => {
            tracing::info!("{}", summary_line(&summary));
            if summary.count(Outcome::Failed) > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        None => ExitCode::FAILURE,
    }
}

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use anyvm_runner::cli::{Cli, Commands};
use anyvm_runner::config::{RunnerConfig, SessionInputs};
use anyvm_runner::orchestrator::{HostContext, SessionOrchestrator};
use anyvm_runner::Result;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("anyvm_runner=debug")
    } else {
        EnvFilter::new("anyvm_runner=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(filter)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run { action_dir } => {
            let host = HostContext::detect(action_dir)?;
            let inputs = SessionInputs::from_env();
            let config = RunnerConfig::load(&host.action_dir).await?;

            let orchestrator = SessionOrchestrator::new(inputs, config, host);
            orchestrator.run().await
        }
    }
}

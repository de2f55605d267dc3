//! specfan CLI - main entry point
//!
//! Clones the repository, prepares the runner environment and runs every
//! requested spec in parallel, reporting each outcome.

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod args;

use args::{Cli, LogFormat, RETRY_ENV};
use specfan_e2e::Orchestrator;

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("SPECFAN_LOG").unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let registry = tracing_subscriber::registry().with(filter);
    match cli.log_format {
        LogFormat::Text => registry
            .with(fmt::layer().with_target(false).with_ansi(false))
            .init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    info!("specfan v{}", env!("CARGO_PKG_VERSION"));

    let retry_override = std::env::var(RETRY_ENV).ok();
    let settings = cli.settings(retry_override.as_deref())?;
    let request = cli.request()?;

    let orchestrator = Orchestrator::new(settings);
    match orchestrator.run(&request).await {
        Ok(summary) => {
            info!(
                total = summary.total,
                passed = summary.passed,
                failed = summary.failed,
                "Program execution successful"
            );
            Ok(())
        }
        Err(e) => {
            error!("Program execution failed: {}", e);
            std::process::exit(1);
        }
    }
}

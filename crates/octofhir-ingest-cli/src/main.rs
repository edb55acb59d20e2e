mod cli;
mod commands;
mod config;
mod observability;
mod output;

use anyhow::Result;
use clap::Parser;
use octofhir_ingest::{ErrorCategory, IngestConfig, IngestError};

use cli::{Cli, Commands};
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv()
        && !matches!(e, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
    {
        eprintln!("Warning: Failed to load .env file: {e}");
    }

    let cli = Cli::parse();
    let cfg = match config::resolve(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            print_error(&format!("Configuration error: {e:#}"));
            std::process::exit(2);
        }
    };
    observability::init_tracing(&cfg.logging);

    match run(&cli, &cfg).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            print_error(&format!("{e:#}"));
            std::process::exit(exit_code(&e));
        }
    }
}

async fn run(cli: &Cli, cfg: &IngestConfig) -> Result<bool> {
    match &cli.command {
        Commands::Load(_) => commands::load::load(cfg).await,
        Commands::Plan(_) => commands::plan::plan(cfg),
        Commands::Import(args) => commands::import::import(cfg, args).await,
    }
}

fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<IngestError>().map(IngestError::category) {
        Some(ErrorCategory::Configuration) => 2,
        _ => 1,
    }
}

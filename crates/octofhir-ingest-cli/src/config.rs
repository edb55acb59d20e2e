use anyhow::{Context, Result};
use octofhir_ingest::config::loader;
use octofhir_ingest::{IngestConfig, Tier1Policy};

use crate::cli::{Cli, Commands};

/// File, then environment, then command-line flags.
pub fn resolve(cli: &Cli) -> Result<IngestConfig> {
    let mut cfg = loader::load_config(cli.config.as_deref()).context("loading configuration")?;

    if let Some(url) = &cli.base_url {
        cfg.server.base_url = url.clone();
    }
    if let Some(dir) = &cli.log_dir {
        cfg.artifacts.log_dir = dir.clone();
    }
    if cli.debug {
        cfg.logging.debug = true;
    }
    if cli.no_accept {
        cfg.upload.send_accept = false;
    }
    if cli.no_prefer_minimal {
        cfg.upload.prefer_minimal = false;
    }

    match &cli.command {
        Commands::Load(args) => {
            if let Some(dir) = &args.dir {
                cfg.upload.input_dir = dir.clone();
            }
            if let Some(n) = args.concurrency {
                cfg.upload.concurrency = n;
            }
            if let Some(r) = args.retries {
                cfg.upload.retries = r;
            }
            if args.halt_tier1 {
                cfg.upload.tier1_policy = Tier1Policy::HaltTier;
            }
        }
        Commands::Plan(args) => {
            if let Some(dir) = &args.dir {
                cfg.upload.input_dir = dir.clone();
            }
        }
        Commands::Import(_) => {}
    }

    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "octofhir-ingest")]
#[command(about = "Load synthetic FHIR bundles and run bulk $import jobs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: ./octofhir-ingest.toml when present)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// FHIR base URL (overrides config)
    #[arg(short, long, global = true, env = "FHIR_BASE")]
    pub base_url: Option<String>,

    /// Directory for failure artifacts
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Do not send `Accept: application/fhir+json`
    #[arg(long, global = true)]
    pub no_accept: bool,

    /// Do not send `Prefer: return=minimal`
    #[arg(long, global = true)]
    pub no_prefer_minimal: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Upload every bundle in a directory, referential data first
    Load(LoadArgs),
    /// Show the upload order without sending anything
    Plan(PlanArgs),
    /// Submit a bulk $import job and poll it to completion
    Import(ImportArgs),
}

#[derive(clap::Args)]
pub struct LoadArgs {
    /// Input directory (default: upload.input_dir)
    pub dir: Option<PathBuf>,
    /// Parallel uploads for patient bundles
    #[arg(short = 'j', long)]
    pub concurrency: Option<usize>,
    /// Extra attempts after a timeout or connection failure
    #[arg(short, long)]
    pub retries: Option<u32>,
    /// Skip remaining practitioner/facility/payer files after the first failure
    #[arg(long)]
    pub halt_tier1: bool,
}

#[derive(clap::Args)]
pub struct PlanArgs {
    /// Input directory (default: upload.input_dir)
    pub dir: Option<PathBuf>,
}

#[derive(clap::Args)]
#[command(group(clap::ArgGroup::new("source").required(true).args(["parameters", "input"])))]
pub struct ImportArgs {
    /// Parameters resource to submit as-is
    #[arg(short, long)]
    pub parameters: Option<PathBuf>,
    /// NDJSON source as TYPE=URL (repeatable)
    #[arg(short, long, value_name = "TYPE=URL")]
    pub input: Vec<String>,
}

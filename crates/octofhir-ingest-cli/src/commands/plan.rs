use anyhow::{Context, Result};
use octofhir_ingest::{IngestConfig, LoadPlan, discover};
use regex::Regex;

use crate::output::print_plan;

pub fn discover_plan(cfg: &IngestConfig) -> Result<LoadPlan> {
    let pattern = Regex::new(&cfg.upload.file_pattern)?;
    let dir = &cfg.upload.input_dir;
    let files = discover(dir, &pattern)
        .with_context(|| format!("Cannot list input directory {}", dir.display()))?;
    Ok(LoadPlan::from_files(files))
}

pub fn plan(cfg: &IngestConfig) -> Result<bool> {
    let plan = discover_plan(cfg)?;
    print_plan(&plan);
    Ok(true)
}

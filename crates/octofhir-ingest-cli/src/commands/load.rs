use std::sync::Arc;

use anyhow::Result;
use colored::Colorize;
use octofhir_ingest::{
    ArtifactLogger, DependencyOrderedLoader, IngestConfig, ReqwestTransport, UploadWorker,
};

use super::plan::discover_plan;
use crate::output::{print_outcome, print_summary};

pub async fn load(cfg: &IngestConfig) -> Result<bool> {
    let plan = discover_plan(cfg)?;
    if plan.is_empty() {
        println!(
            "No files matching {} in {}",
            cfg.upload.file_pattern,
            cfg.upload.input_dir.display()
        );
        return Ok(true);
    }

    let transport =
        ReqwestTransport::new(cfg.upload.connect_timeout(), cfg.upload.request_timeout())?;
    let artifacts = ArtifactLogger::new(&cfg.artifacts.log_dir, cfg.artifacts.enabled);
    let worker = UploadWorker::new(Arc::new(transport), cfg, artifacts);
    let loader =
        DependencyOrderedLoader::new(worker, cfg.upload.concurrency, cfg.upload.tier1_policy);

    tracing::info!(
        base_url = %cfg.server.base(),
        input_dir = %cfg.upload.input_dir.display(),
        files = plan.len(),
        referential = plan.referential.len(),
        concurrency = cfg.upload.concurrency,
        retries = cfg.upload.retries,
        tier1_policy = ?cfg.upload.tier1_policy,
        "Starting load"
    );
    println!(
        "{}: {} file(s) to {} ({} referential, concurrency {})",
        "Loading".cyan(),
        plan.len(),
        cfg.server.base(),
        plan.referential.len(),
        cfg.upload.concurrency
    );
    let report = loader.run_with(plan, print_outcome).await;
    tracing::info!(
        succeeded = report.total() - report.failed(),
        failed = report.failed(),
        elapsed_ms = report.elapsed.as_millis() as u64,
        "Load finished"
    );
    print_summary(&report);

    if !report.is_success() && cfg.artifacts.enabled {
        println!(
            "{}: {}",
            "Failure artifacts".cyan(),
            cfg.artifacts.log_dir.display()
        );
    }
    Ok(report.is_success())
}

use std::sync::Arc;

use anyhow::{Context, Result};
use octofhir_ingest::{
    BulkImportJobClient, ImportInput, IngestConfig, JobState, ReqwestTransport, import_parameters,
};
use serde_json::Value;

use crate::cli::ImportArgs;
use crate::output::{print_job_result, print_poll, print_submit_response};

async fn parameters(args: &ImportArgs) -> Result<Value> {
    if let Some(path) = &args.parameters {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Cannot read {}", path.display()))?;
        let value = serde_json::from_str(&text)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        return Ok(value);
    }
    let inputs = args
        .input
        .iter()
        .map(|raw| raw.parse::<ImportInput>())
        .collect::<Result<Vec<_>, _>>()?;
    Ok(import_parameters(&inputs))
}

pub async fn import(cfg: &IngestConfig, args: &ImportArgs) -> Result<bool> {
    let parameters = parameters(args).await?;

    let transport = ReqwestTransport::new(cfg.upload.connect_timeout(), cfg.bulk.request_timeout())?;
    let client = BulkImportJobClient::new(Arc::new(transport), cfg);

    let response = client
        .send_submit(&parameters)
        .await
        .with_context(|| format!("Submitting to {}", client.import_url()))?;
    print_submit_response(&response);

    let mut job = client.accept_submission(&response)?;
    tracing::info!(
        job_id = %job.job_id,
        poll_url = %job.poll_url,
        poll_interval_ms = cfg.bulk.poll_interval_ms,
        max_polls = ?cfg.bulk.max_polls,
        "Polling bulk import job"
    );
    let job_id = job.job_id.clone();
    client
        .poll_with(&mut job, |event| print_poll(&job_id, event))
        .await?;
    tracing::info!(
        job_id = %job.job_id,
        state = job.state().name(),
        poll_count = job.poll_count(),
        "Bulk import job finished"
    );
    print_job_result(&job);

    Ok(matches!(job.state(), JobState::Completed))
}

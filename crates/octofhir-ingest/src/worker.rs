//! One file, one POST, bounded retries for transport failures.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::artifacts::ArtifactLogger;
use crate::classifier::classify;
use crate::config::{IngestConfig, UploadConfig};
use crate::error::TransportError;
use crate::model::{
    FailureCause, FileOutcome, ResourceFile, TransportOutcome, UploadAttempt, UploadResult,
};
use crate::transport::{FHIR_JSON, FhirTransport, HttpRequest};

pub struct UploadWorker {
    transport: Arc<dyn FhirTransport>,
    endpoint: String,
    settings: UploadConfig,
    artifacts: ArtifactLogger,
}

impl UploadWorker {
    pub fn new(
        transport: Arc<dyn FhirTransport>,
        config: &IngestConfig,
        artifacts: ArtifactLogger,
    ) -> Self {
        Self {
            transport,
            endpoint: config.server.base().to_string(),
            settings: config.upload.clone(),
            artifacts,
        }
    }

    pub fn build_request(&self, payload: Vec<u8>) -> HttpRequest {
        let mut request =
            HttpRequest::post(self.endpoint.clone(), payload).header("Content-Type", FHIR_JSON);
        if self.settings.send_accept {
            request = request.header("Accept", FHIR_JSON);
        }
        if self.settings.prefer_minimal {
            request = request.header("Prefer", "return=minimal");
        }
        request
    }

    /// Upload one file and return its terminal result.
    ///
    /// Retries only timeouts and connection failures, up to `retries` extra
    /// attempts. HTTP rejections are final after one attempt. No deduplication
    /// token is sent, so a retried bundle may be applied twice by the store.
    pub async fn upload(&self, file: &ResourceFile) -> FileOutcome {
        let payload = match tokio::fs::read(&file.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(file = %file.name, error = %e, "Cannot read input file");
                return FileOutcome {
                    file: file.clone(),
                    result: UploadResult::failure(FailureCause::Io(e.to_string())),
                    attempts: Vec::new(),
                };
            }
        };

        let request = self.build_request(payload);
        let max_attempts = self.settings.retries.saturating_add(1);
        let mut attempts = Vec::new();

        let result = loop {
            let attempt = attempts.len() as u32 + 1;
            let started_at = OffsetDateTime::now_utc();
            let sent = self.transport.send(request.clone()).await;
            let finished_at = OffsetDateTime::now_utc();

            match sent {
                Ok(resp) => {
                    let result = classify(resp.status, None, &resp.body);
                    attempts.push(UploadAttempt {
                        attempt,
                        started_at,
                        finished_at,
                        status: resp.status,
                        outcome: TransportOutcome::Success,
                        error: None,
                        response_body: resp.body,
                        response_headers: resp.headers,
                    });
                    break result;
                }
                Err(err) => {
                    attempts.push(UploadAttempt {
                        attempt,
                        started_at,
                        finished_at,
                        status: 0,
                        outcome: transport_outcome(&err),
                        error: Some(err.to_string()),
                        response_body: String::new(),
                        response_headers: Vec::new(),
                    });
                    if err.is_retryable() && attempt < max_attempts {
                        let delay = self.settings.backoff_for(attempt);
                        tracing::warn!(
                            file = %file.name,
                            attempt,
                            max_attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "Transport failure, retrying"
                        );
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                        continue;
                    }
                    break classify(0, Some(&err), "");
                }
            }
        };

        if result.is_success() {
            tracing::info!(file = %file.name, attempts = attempts.len(), "Upload succeeded");
            self.artifacts.clear(file).await;
        } else {
            tracing::warn!(file = %file.name, attempts = attempts.len(), result = ?result, "Upload failed");
            self.artifacts
                .persist_failure(file, &request, &attempts)
                .await;
        }

        FileOutcome {
            file: file.clone(),
            result,
            attempts,
        }
    }
}

fn transport_outcome(err: &TransportError) -> TransportOutcome {
    match err {
        TransportError::Timeout(_) => TransportOutcome::Timeout,
        TransportError::Connect(_) => TransportOutcome::ConnectionError,
        TransportError::Other(_) => TransportOutcome::Other,
    }
}

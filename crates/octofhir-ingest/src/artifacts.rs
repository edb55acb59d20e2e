//! Per-file diagnostic artifacts, kept only for failed uploads.

use std::path::PathBuf;

use serde_json::json;
use time::format_description::well_known::Rfc3339;

use crate::model::{ResourceFile, UploadAttempt};
use crate::transport::HttpRequest;

const KINDS: [&str; 4] = ["headers.txt", "trace.log", "timing.json", "response.txt"];

#[derive(Debug, Clone)]
pub struct ArtifactLogger {
    dir: PathBuf,
    enabled: bool,
}

impl ArtifactLogger {
    pub fn new(dir: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            dir: dir.into(),
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self::new(PathBuf::new(), false)
    }

    /// Deterministic artifact paths for one input file.
    pub fn paths_for(&self, file: &ResourceFile) -> [PathBuf; 4] {
        let stem = file.stem();
        KINDS.map(|kind| self.dir.join(format!("{stem}.{kind}")))
    }

    /// Write headers, trace, timing and last body for a failed file.
    pub async fn persist_failure(
        &self,
        file: &ResourceFile,
        request: &HttpRequest,
        attempts: &[UploadAttempt],
    ) {
        if !self.enabled {
            return;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            tracing::warn!(dir = %self.dir.display(), error = %e, "Cannot create artifact directory");
            return;
        }

        let [headers, trace, timing, response] = self.paths_for(file);
        let contents = [
            (headers, render_headers(request, attempts)),
            (trace, render_trace(request, attempts)),
            (timing, render_timing(attempts)),
            (
                response,
                attempts
                    .last()
                    .map(|a| a.response_body.clone())
                    .unwrap_or_default(),
            ),
        ];
        for (path, content) in contents {
            if let Err(e) = tokio::fs::write(&path, content).await {
                tracing::warn!(path = %path.display(), error = %e, "Failed to write artifact");
            }
        }
        tracing::debug!(file = %file.name, dir = %self.dir.display(), "Failure artifacts written");
    }

    /// Remove artifacts left over for a file that has now succeeded.
    pub async fn clear(&self, file: &ResourceFile) {
        if !self.enabled {
            return;
        }
        for path in self.paths_for(file) {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => tracing::debug!(path = %path.display(), "Removed stale artifact"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove artifact")
                }
            }
        }
    }
}

fn timestamp(at: time::OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn render_headers(request: &HttpRequest, attempts: &[UploadAttempt]) -> String {
    let mut lines = vec![format!("> {} {}", request.method, request.url)];
    lines.extend(
        request
            .headers
            .iter()
            .map(|(name, value)| format!("> {name}: {value}")),
    );
    if let Some(last) = attempts.last() {
        lines.push(String::new());
        lines.push(match last.status {
            0 => format!("< (no response: {})", last.outcome),
            status => format!("< HTTP {status}"),
        });
        lines.extend(
            last.response_headers
                .iter()
                .map(|(name, value)| format!("< {name}: {value}")),
        );
    }
    lines.push(String::new());
    lines.join("\n")
}

fn render_trace(request: &HttpRequest, attempts: &[UploadAttempt]) -> String {
    let body_len = request.body.as_ref().map(Vec::len).unwrap_or(0);
    let mut out = String::new();
    for a in attempts {
        out.push_str(&format!(
            "{} attempt={} send {} {} ({body_len} bytes)\n",
            timestamp(a.started_at),
            a.attempt,
            request.method,
            request.url
        ));
        let error = a
            .error
            .as_deref()
            .map(|e| format!(" error={e}"))
            .unwrap_or_default();
        out.push_str(&format!(
            "{} attempt={} recv status={} outcome={}{error}\n",
            timestamp(a.finished_at),
            a.attempt,
            a.status,
            a.outcome
        ));
    }
    out
}

fn render_timing(attempts: &[UploadAttempt]) -> String {
    let entries: Vec<_> = attempts
        .iter()
        .map(|a| {
            json!({
                "attempt": a.attempt,
                "startedAt": timestamp(a.started_at),
                "finishedAt": timestamp(a.finished_at),
                "durationMs": a.duration().as_millis() as u64,
                "status": a.status,
                "outcome": a.outcome.to_string(),
            })
        })
        .collect();
    serde_json::to_string_pretty(&json!({ "attempts": entries })).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportOutcome;
    use time::OffsetDateTime;

    fn failed_attempt(n: u32) -> UploadAttempt {
        let now = OffsetDateTime::now_utc();
        UploadAttempt {
            attempt: n,
            started_at: now,
            finished_at: now + time::Duration::milliseconds(25),
            status: 400,
            outcome: TransportOutcome::Success,
            error: None,
            response_body: "{\"resourceType\":\"OperationOutcome\"}".into(),
            response_headers: vec![("content-type".into(), "application/fhir+json".into())],
        }
    }

    #[tokio::test]
    async fn test_persist_then_clear() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let logger = ArtifactLogger::new(dir.path().join("logs"), true);
        let file = ResourceFile::new("/in/Jane_Doe_1.json", 10);
        let request = HttpRequest::post("http://store/fhir", b"{}".to_vec())
            .header("Content-Type", "application/fhir+json");

        logger
            .persist_failure(&file, &request, &[failed_attempt(1)])
            .await;

        let paths = logger.paths_for(&file);
        assert!(paths.iter().all(|p| p.exists()));
        assert!(paths[0].ends_with("Jane_Doe_1.headers.txt"));

        let headers = std::fs::read_to_string(&paths[0]).expect("headers");
        assert!(headers.contains("> POST http://store/fhir"));
        assert!(headers.contains("< HTTP 400"));
        assert!(headers.contains("< content-type: application/fhir+json"));

        let trace = std::fs::read_to_string(&paths[1]).expect("trace");
        let trace_lines: Vec<&str> = trace.lines().collect();
        assert_eq!(trace_lines.len(), 2);
        assert!(trace_lines[0].ends_with("attempt=1 send POST http://store/fhir (2 bytes)"));
        assert!(trace_lines[1].ends_with("attempt=1 recv status=400 outcome=success"));

        let timing: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&paths[2]).expect("timing"))
                .expect("timing json");
        assert_eq!(timing["attempts"][0]["durationMs"], 25);

        let body = std::fs::read_to_string(&paths[3]).expect("body");
        assert!(body.contains("OperationOutcome"));

        logger.clear(&file).await;
        assert!(paths.iter().all(|p| !p.exists()));
    }

    #[test]
    fn test_headers_for_attempt_without_response() {
        let request = HttpRequest::post("http://store/fhir", Vec::new());
        let mut attempt = failed_attempt(2);
        attempt.status = 0;
        attempt.outcome = TransportOutcome::Timeout;
        attempt.error = Some("operation timed out".into());
        attempt.response_headers.clear();

        let headers = render_headers(&request, &[attempt.clone()]);
        assert_eq!(headers, "> POST http://store/fhir\n\n< (no response: timeout)\n");

        let trace = render_trace(&request, &[attempt]);
        assert!(trace.contains("recv status=0 outcome=timeout error=operation timed out\n"));
    }

    #[tokio::test]
    async fn test_disabled_logger_writes_nothing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let logger = ArtifactLogger::new(dir.path(), false);
        let file = ResourceFile::new("practitioner.json", 1);
        let request = HttpRequest::post("http://store/fhir", Vec::new());

        logger
            .persist_failure(&file, &request, &[failed_attempt(1)])
            .await;
        assert!(logger.paths_for(&file).iter().all(|p| !p.exists()));
    }
}

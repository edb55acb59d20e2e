//! Bulk `$import` client: submit once, then poll until a terminal state.
//!
//! ```text
//! Submitted ─► Running ─► Running ─► … ─┬─► Completed
//!     │                                 ├─► Failed
//!     └─────────────────────────────────┴─► Errored
//! ```
//!
//! Servers report the job id inconsistently, so it is looked up with an
//! ordered list of matchers over the submit response; the first hit wins.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::classifier::{
    extract_diagnostics, has_error_issue, operation_outcome_issues, render_diagnostics,
};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result, TransportError};
use crate::model::Diagnostics;
use crate::transport::{FHIR_JSON, FhirTransport, HttpRequest, HttpResponse};

pub const IMPORT_PATH: &str = "$import";
pub const POLL_PATH: &str = "$import-poll-status";
pub const JOB_ID_PARAM: &str = "_jobId";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobErrorKind {
    JobIdNotFound,
    HttpStatus(u16),
    Transport(String),
    PollLimitExceeded(u32),
}

impl fmt::Display for JobErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::JobIdNotFound => write!(f, "job id not found"),
            Self::HttpStatus(status) => write!(f, "unexpected HTTP {status}"),
            Self::Transport(msg) => write!(f, "transport failure: {msg}"),
            Self::PollLimitExceeded(max) => write!(f, "still running after {max} polls"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    Submitted,
    Running,
    Completed,
    Failed { reason: String },
    Errored(JobErrorKind),
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed { .. } | Self::Errored(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed { .. } => "failed",
            Self::Errored(_) => "errored",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { reason } => write!(f, "failed ({reason})"),
            Self::Errored(kind) => write!(f, "errored ({kind})"),
            other => f.write_str(other.name()),
        }
    }
}

/// A submitted job and its lifecycle so far.
#[derive(Debug, Clone)]
pub struct BulkImportJob {
    pub job_id: String,
    pub submitted_at: OffsetDateTime,
    pub poll_url: String,
    state: JobState,
    poll_count: u32,
    sleeps: u32,
    /// Diagnostics from the response that made the job fail or error.
    pub diagnostics: Diagnostics,
}

impl BulkImportJob {
    pub fn new(job_id: impl Into<String>, poll_url: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            submitted_at: OffsetDateTime::now_utc(),
            poll_url: poll_url.into(),
            state: JobState::Submitted,
            poll_count: 0,
            sleeps: 0,
            diagnostics: Diagnostics::None,
        }
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn poll_count(&self) -> u32 {
        self.poll_count
    }

    pub fn sleeps(&self) -> u32 {
        self.sleeps
    }

    /// Move to `next`; a terminal state is never left.
    pub fn transition(&mut self, next: JobState) -> Result<()> {
        let allowed = match (&self.state, &next) {
            (current, _) if current.is_terminal() => false,
            (_, JobState::Submitted) => false,
            _ => true,
        };
        if !allowed {
            return Err(IngestError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// `Ok` only for a completed job.
    pub fn outcome(&self) -> Result<()> {
        match &self.state {
            JobState::Completed => Ok(()),
            JobState::Failed { reason } => Err(IngestError::job_failed(&self.job_id, reason)),
            JobState::Errored(kind) => {
                Err(IngestError::job_errored(&self.job_id, kind.to_string()))
            }
            JobState::Submitted | JobState::Running => Err(IngestError::job_errored(
                &self.job_id,
                format!("not finished ({})", self.state),
            )),
        }
    }
}

pub type JobIdMatcher = fn(&HttpResponse) -> Option<String>;

/// Tried in order; the first match wins.
pub const JOB_ID_MATCHERS: &[(&str, JobIdMatcher)] = &[
    ("header", job_id_from_header),
    ("body-phrase", job_id_from_phrase),
    ("json-field", job_id_from_json),
];

pub fn extract_job_id(response: &HttpResponse) -> Option<(String, &'static str)> {
    JOB_ID_MATCHERS
        .iter()
        .find_map(|(name, matcher)| matcher(response).map(|id| (id, *name)))
}

/// `_jobId` query parameter of `Content-Location`, then `Location`.
pub fn job_id_from_header(response: &HttpResponse) -> Option<String> {
    ["content-location", "location"]
        .iter()
        .filter_map(|name| response.header(name))
        .find_map(job_id_from_url)
}

fn job_id_from_url(raw: &str) -> Option<String> {
    let parsed = url::Url::parse(raw)
        .or_else(|_| url::Url::parse("http://localhost/").and_then(|base| base.join(raw)))
        .ok()?;
    parsed
        .query_pairs()
        .find(|(k, _)| k == JOB_ID_PARAM)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

static ID_PHRASE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bID:\s*([A-Za-z0-9][A-Za-z0-9._-]*)").expect("static regex"));

/// `ID: <token>` anywhere in the body text.
pub fn job_id_from_phrase(response: &HttpResponse) -> Option<String> {
    ID_PHRASE
        .captures(&response.body)
        .map(|c| c[1].to_string())
}

/// Top-level `jobId` field of a JSON body.
pub fn job_id_from_json(response: &HttpResponse) -> Option<String> {
    let json: Value = serde_json::from_str(&response.body).ok()?;
    match json.get("jobId")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

static FAILURE_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(job\s+(has\s+)?failed|import\s+failed|status\W+failed)\b")
        .expect("static regex")
});

/// Interpret the body of a terminal (HTTP 200) poll response.
///
/// A structured `status` field or an `OperationOutcome` decides when present;
/// free-text matching is only the fallback for bodies without either.
pub fn terminal_state(body: &str) -> JobState {
    if let Ok(json) = serde_json::from_str::<Value>(body) {
        if let Some(status) = json.get("status").and_then(|v| v.as_str()) {
            if status.eq_ignore_ascii_case("failed") || status.eq_ignore_ascii_case("error") {
                let detail = ["error", "message", "diagnostics"]
                    .iter()
                    .find_map(|k| json.get(*k).and_then(|v| v.as_str()));
                let reason = match detail {
                    Some(d) => format!("status {status}: {d}"),
                    None => format!("status {status}"),
                };
                return JobState::Failed { reason };
            }
            return JobState::Completed;
        }
        if let Some(issues) = operation_outcome_issues(&json) {
            if has_error_issue(&issues) {
                let reason = issues
                    .iter()
                    .find(|i| matches!(i.severity.as_str(), "error" | "fatal"))
                    .map(|i| i.message.clone())
                    .unwrap_or_else(|| "OperationOutcome reports an error".into());
                return JobState::Failed { reason };
            }
            return JobState::Completed;
        }
    }
    if FAILURE_TEXT.is_match(body) {
        return JobState::Failed {
            reason: "response text reports a failed job".into(),
        };
    }
    JobState::Completed
}

/// One `type=url` import source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportInput {
    pub resource_type: String,
    pub url: String,
}

impl FromStr for ImportInput {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let (resource_type, url) = s.split_once('=').ok_or_else(|| {
            IngestError::config(format!("invalid import input \"{s}\", expected TYPE=URL"))
        })?;
        if resource_type.is_empty() || url.is_empty() {
            return Err(IngestError::config(format!(
                "invalid import input \"{s}\", expected TYPE=URL"
            )));
        }
        url::Url::parse(url)?;
        Ok(Self {
            resource_type: resource_type.to_string(),
            url: url.to_string(),
        })
    }
}

/// Build an `$import` Parameters resource for NDJSON sources.
pub fn import_parameters(inputs: &[ImportInput]) -> Value {
    let mut parameter = vec![json!({
        "name": "inputFormat",
        "valueCode": "application/fhir+ndjson"
    })];
    parameter.extend(inputs.iter().map(|i| {
        json!({
            "name": "input",
            "part": [
                { "name": "type", "valueCode": i.resource_type },
                { "name": "url", "valueUrl": i.url }
            ]
        })
    }));
    json!({
        "resourceType": "Parameters",
        "parameter": parameter
    })
}

#[async_trait]
pub trait PollSleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl PollSleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Reported after every poll.
#[derive(Debug, Clone)]
pub struct PollEvent {
    pub poll: u32,
    pub at: OffsetDateTime,
    /// 0 when the poll got no response.
    pub status: u16,
    pub state: JobState,
    pub progress: Option<String>,
}

pub struct BulkImportJobClient {
    transport: Arc<dyn FhirTransport>,
    base_url: String,
    poll_interval: Duration,
    max_polls: Option<u32>,
    sleeper: Arc<dyn PollSleeper>,
}

impl BulkImportJobClient {
    pub fn new(transport: Arc<dyn FhirTransport>, config: &IngestConfig) -> Self {
        Self {
            transport,
            base_url: config.server.base().to_string(),
            poll_interval: config.bulk.poll_interval(),
            max_polls: config.bulk.max_polls,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn PollSleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn import_url(&self) -> String {
        format!("{}/{IMPORT_PATH}", self.base_url)
    }

    pub fn poll_url(&self, job_id: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(job_id.as_bytes()).collect();
        format!("{}/{POLL_PATH}?{JOB_ID_PARAM}={encoded}", self.base_url)
    }

    /// POST the parameters with `Prefer: respond-async` and return the raw response.
    pub async fn send_submit(
        &self,
        parameters: &Value,
    ) -> std::result::Result<HttpResponse, TransportError> {
        let body = serde_json::to_vec(parameters).map_err(|e| TransportError::Other(e.to_string()))?;
        let request = HttpRequest::post(self.import_url(), body)
            .header("Content-Type", FHIR_JSON)
            .header("Accept", FHIR_JSON)
            .header("Prefer", "respond-async");
        tracing::info!(url = %request.url, "Submitting bulk import job");
        self.transport.send(request).await
    }

    /// Turn a submit response into a job, or fail if it cannot be polled.
    pub fn accept_submission(&self, response: &HttpResponse) -> Result<BulkImportJob> {
        if !response.is_success() {
            let diagnostics = extract_diagnostics(&response.body);
            for line in render_diagnostics(&diagnostics) {
                tracing::error!(status = response.status, "{line}");
            }
            return Err(IngestError::Http {
                status: response.status,
            });
        }
        let Some((job_id, matcher)) = extract_job_id(response) else {
            tracing::error!(status = response.status, "No job id in submit response");
            return Err(IngestError::JobIdNotFound {
                status: response.status,
            });
        };
        tracing::info!(job_id = %job_id, matcher, "Bulk import job accepted");
        let poll_url = self.poll_url(&job_id);
        Ok(BulkImportJob::new(job_id, poll_url))
    }

    pub async fn submit(&self, parameters: &Value) -> Result<BulkImportJob> {
        let response = self.send_submit(parameters).await?;
        self.accept_submission(&response)
    }

    pub async fn poll(&self, job: &mut BulkImportJob) -> Result<()> {
        self.poll_with(job, |_| {}).await
    }

    /// Poll until the job is terminal. 202 keeps polling after one interval,
    /// 200 is terminal, anything else errors the job without further polls.
    pub async fn poll_with<F>(&self, job: &mut BulkImportJob, mut on_poll: F) -> Result<()>
    where
        F: FnMut(&PollEvent),
    {
        while !job.state.is_terminal() {
            let request = HttpRequest::get(job.poll_url.clone()).header("Accept", FHIR_JSON);
            let sent = self.transport.send(request).await;
            job.poll_count += 1;

            let (status, progress, next) = match sent {
                Err(e) => (0, None, JobState::Errored(JobErrorKind::Transport(e.to_string()))),
                Ok(resp) => {
                    let progress = resp.header("x-progress").map(str::to_string);
                    let next = match resp.status {
                        202 => JobState::Running,
                        200 => terminal_state(&resp.body),
                        other => JobState::Errored(JobErrorKind::HttpStatus(other)),
                    };
                    if matches!(next, JobState::Failed { .. } | JobState::Errored(_)) {
                        job.diagnostics = extract_diagnostics(&resp.body);
                    }
                    (resp.status, progress, next)
                }
            };
            job.transition(next)?;

            tracing::info!(
                job_id = %job.job_id,
                poll = job.poll_count,
                status,
                state = job.state.name(),
                "Bulk import poll"
            );
            on_poll(&PollEvent {
                poll: job.poll_count,
                at: OffsetDateTime::now_utc(),
                status,
                state: job.state.clone(),
                progress,
            });

            if job.state.is_terminal() {
                break;
            }
            if let Some(max) = self.max_polls
                && job.poll_count >= max
            {
                job.transition(JobState::Errored(JobErrorKind::PollLimitExceeded(max)))?;
                break;
            }
            self.sleeper.sleep(self.poll_interval).await;
            job.sleeps += 1;
        }
        Ok(())
    }
}

//! Turns an HTTP exchange into an [`UploadResult`].
//!
//! Shared by the per-file uploader and the bulk import poller, which both see
//! FHIR responses that may carry an `OperationOutcome`.

use serde_json::Value;

use crate::error::TransportError;
use crate::model::{Diagnostic, Diagnostics, FailureCause, UploadResult};

/// Lines of an unstructured body kept as a diagnostic excerpt.
pub const RAW_EXCERPT_LINES: usize = 50;

/// Classify one attempt. `status` is 0 when no response was received.
pub fn classify(status: u16, transport_error: Option<&TransportError>, body: &str) -> UploadResult {
    if let Some(err) = transport_error {
        let cause = match err {
            TransportError::Timeout(_) => FailureCause::Timeout,
            TransportError::Connect(_) => FailureCause::ConnectionError,
            TransportError::Other(msg) => FailureCause::Transport(msg.clone()),
        };
        return UploadResult::failure(cause);
    }

    if (200..300).contains(&status) {
        return UploadResult::Success { status };
    }

    UploadResult::Failure {
        cause: FailureCause::HttpError(status),
        diagnostics: extract_diagnostics(body),
    }
}

/// Issues of an `OperationOutcome` body, or a raw excerpt when the body is
/// anything else.
pub fn extract_diagnostics(body: &str) -> Diagnostics {
    if let Some(issues) = parse_operation_outcome(body) {
        return Diagnostics::Issues(issues);
    }
    let excerpt = raw_excerpt(body, RAW_EXCERPT_LINES);
    if excerpt.trim().is_empty() {
        Diagnostics::None
    } else {
        Diagnostics::Raw(excerpt)
    }
}

/// Parse the issues out of an `OperationOutcome`, `None` if the body is not one.
pub fn parse_operation_outcome(body: &str) -> Option<Vec<Diagnostic>> {
    let json: Value = serde_json::from_str(body).ok()?;
    operation_outcome_issues(&json)
}

pub fn operation_outcome_issues(json: &Value) -> Option<Vec<Diagnostic>> {
    if json.get("resourceType").and_then(|v| v.as_str()) != Some("OperationOutcome") {
        return None;
    }
    let issues = json.get("issue").and_then(|v| v.as_array())?;
    Some(
        issues
            .iter()
            .map(|issue| Diagnostic {
                severity: str_field(issue, "severity").unwrap_or("unknown").to_string(),
                code: str_field(issue, "code").unwrap_or("unknown").to_string(),
                message: issue_message(issue),
            })
            .collect(),
    )
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

// diagnostics, then details.text, then the first coding display
fn issue_message(issue: &Value) -> String {
    str_field(issue, "diagnostics")
        .or_else(|| issue.get("details").and_then(|d| str_field(d, "text")))
        .or_else(|| {
            issue
                .get("details")
                .and_then(|d| d.get("coding"))
                .and_then(|c| c.as_array())
                .and_then(|c| c.first())
                .and_then(|c| str_field(c, "display"))
        })
        .unwrap_or("")
        .to_string()
}

pub fn raw_excerpt(body: &str, max_lines: usize) -> String {
    let mut lines = body.lines();
    let mut excerpt: Vec<&str> = lines.by_ref().take(max_lines).collect();
    if lines.next().is_some() {
        excerpt.push("...");
    }
    excerpt.join("\n")
}

/// Whether any issue is an error or fatal.
pub fn has_error_issue(issues: &[Diagnostic]) -> bool {
    issues
        .iter()
        .any(|i| matches!(i.severity.as_str(), "error" | "fatal"))
}

/// Human-readable lines for diagnostics, used by every caller that prints them.
pub fn render_diagnostics(diagnostics: &Diagnostics) -> Vec<String> {
    match diagnostics {
        Diagnostics::None => Vec::new(),
        Diagnostics::Issues(issues) => issues
            .iter()
            .map(|i| format!("[{}] {}: {}", i.severity, i.code, i.message))
            .collect(),
        Diagnostics::Raw(text) => text.lines().map(str::to_string).collect(),
    }
}

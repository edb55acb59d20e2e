//! Bulk `$import` submit and poll against a mock server.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use octofhir_ingest::{
    BulkImportJobClient, ImportInput, IngestConfig, IngestError, JobErrorKind, JobState,
    PollSleeper, ReqwestTransport, import_parameters,
};
use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Default)]
struct CountingSleeper(AtomicU32);

#[async_trait]
impl PollSleeper for CountingSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

fn client(server: &MockServer, sleeper: Arc<CountingSleeper>) -> BulkImportJobClient {
    let mut cfg = IngestConfig::default();
    cfg.server.base_url = format!("{}/fhir/", server.uri());
    let transport = ReqwestTransport::new(Duration::from_secs(2), cfg.bulk.request_timeout())
        .expect("http client");
    BulkImportJobClient::new(Arc::new(transport), &cfg).with_sleeper(sleeper)
}

fn parameters() -> serde_json::Value {
    let input: ImportInput = "Patient=https://files.example.org/Patient.ndjson"
        .parse()
        .expect("input");
    import_parameters(&[input])
}

#[tokio::test]
async fn test_submit_then_poll_to_completion() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fhir/$import"))
        .and(header("prefer", "respond-async"))
        .respond_with(ResponseTemplate::new(202).insert_header(
            "Content-Location",
            format!("{}/fhir/$import-poll-status?_jobId=ABC123", server.uri()).as_str(),
        ))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/$import-poll-status"))
        .and(query_param("_jobId", "ABC123"))
        .respond_with(ResponseTemplate::new(202).insert_header("X-Progress", "50%"))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/$import-poll-status"))
        .and(query_param("_jobId", "ABC123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "Bundle",
            "type": "batch-response"
        })))
        .mount(&server)
        .await;

    let sleeper = Arc::new(CountingSleeper::default());
    let client = client(&server, sleeper.clone());
    let mut job = client.submit(&parameters()).await.expect("submitted");
    assert_eq!(job.job_id, "ABC123");

    let mut progress = Vec::new();
    client
        .poll_with(&mut job, |e| progress.push(e.progress.clone()))
        .await
        .expect("polled");

    assert_eq!(job.state(), &JobState::Completed);
    assert_eq!(job.poll_count(), 3);
    assert_eq!(sleeper.0.load(Ordering::SeqCst), 2);
    assert_eq!(progress[0].as_deref(), Some("50%"));
    assert_eq!(progress[2], None);
}

#[tokio::test]
async fn test_failed_job_from_operation_outcome() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/fhir/$import"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "information", "code": "informational",
                       "diagnostics": "Bulk import job has been submitted with ID: job-9"}]
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/fhir/$import-poll-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceType": "OperationOutcome",
            "issue": [{"severity": "error", "code": "exception",
                       "diagnostics": "Unable to fetch Patient.ndjson"}]
        })))
        .mount(&server)
        .await;

    let sleeper = Arc::new(CountingSleeper::default());
    let client = client(&server, sleeper.clone());
    let mut job = client.submit(&parameters()).await.expect("submitted");
    assert_eq!(job.job_id, "job-9");

    client.poll(&mut job).await.expect("polled");

    assert_eq!(
        job.state(),
        &JobState::Failed {
            reason: "Unable to fetch Patient.ndjson".into()
        }
    );
    assert_eq!(sleeper.0.load(Ordering::SeqCst), 0);
    assert!(matches!(job.outcome(), Err(IngestError::JobFailed { .. })));
}

#[tokio::test]
async fn test_server_error_while_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"jobId": "77"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .expect(1)
        .mount(&server)
        .await;

    let sleeper = Arc::new(CountingSleeper::default());
    let client = client(&server, sleeper.clone());
    let mut job = client.submit(&parameters()).await.expect("submitted");
    client.poll(&mut job).await.expect("polled");

    assert_eq!(
        job.state(),
        &JobState::Errored(JobErrorKind::HttpStatus(503))
    );
    assert_eq!(sleeper.0.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_rejected_submit_is_not_polled() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400).set_body_string("bad parameters"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client(&server, Arc::default());
    let err = client.submit(&parameters()).await.unwrap_err();
    assert!(matches!(err, IngestError::Http { status: 400 }));
}

use colored::Colorize;
use octofhir_ingest::bulk::PollEvent;
use octofhir_ingest::loader::LoadPlan;
use octofhir_ingest::{
    BulkImportJob, FailureCause, FileOutcome, HttpResponse, JobState, LoadReport, UploadResult,
    render_diagnostics,
};
use tabled::builder::Builder;
use tabled::settings::Style;
use time::format_description::well_known::Rfc3339;

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// One status line per file, diagnostics underneath on failure.
pub fn print_outcome(outcome: &FileOutcome) {
    let file = &outcome.file.name;
    let tries = outcome.attempts.len();
    match &outcome.result {
        UploadResult::Success { status } => {
            print_success(&format!("{file} ({status}, {tries} attempt(s))"));
        }
        UploadResult::Failure { cause, diagnostics } => {
            let line = match cause {
                FailureCause::HttpError(status) => format!("{file} rejected with HTTP {status}"),
                FailureCause::Skipped => format!("{file} skipped"),
                other => format!("{file} failed: {other} after {tries} attempt(s)"),
            };
            print_error(&line);
            for diag in render_diagnostics(diagnostics) {
                eprintln!("    {}", diag.dimmed());
            }
        }
    }
}

pub fn print_plan(plan: &LoadPlan) {
    if plan.is_empty() {
        println!("No input files found.");
        return;
    }
    let mut builder = Builder::default();
    builder.push_record(["#", "Tier", "Category", "File", "Bytes"]);
    let ordered = plan.referential.iter().chain(plan.dependent.iter());
    for (i, file) in ordered.enumerate() {
        builder.push_record([
            (i + 1).to_string(),
            file.tier().to_string(),
            file.category.to_string(),
            file.name.clone(),
            file.size.to_string(),
        ]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");
    println!(
        "{}: {} tier-1 file(s) uploaded one at a time, then {} tier-2 file(s) in parallel",
        "Plan".cyan(),
        plan.referential.len(),
        plan.dependent.len()
    );
}

pub fn print_summary(report: &LoadReport) {
    let mut builder = Builder::default();
    builder.push_record(["Tier", "Succeeded", "Failed", "Total"]);
    for (name, counts) in [("tier 1", &report.referential), ("tier 2", &report.dependent)] {
        builder.push_record([
            name.to_string(),
            counts.succeeded.to_string(),
            counts.failed.to_string(),
            counts.total().to_string(),
        ]);
    }
    let table = builder.build().with(Style::rounded()).to_string();
    println!("{table}");

    let elapsed = format!("{:.1}s", report.elapsed.as_secs_f64());
    if report.is_success() {
        print_success(&format!("{} file(s) loaded in {elapsed}", report.total()));
    } else {
        print_error(&format!(
            "{} of {} file(s) failed in {elapsed}",
            report.failed(),
            report.total()
        ));
        for line in failure_lines(report) {
            eprintln!("    {line}");
        }
    }
}

/// `<file>: <cause>` for every failed file, in completion order.
pub fn failure_lines(report: &LoadReport) -> Vec<String> {
    report
        .failures()
        .filter_map(|o| match &o.result {
            UploadResult::Failure { cause, .. } => Some(format!("{}: {cause}", o.file.name)),
            UploadResult::Success { .. } => None,
        })
        .collect()
}

/// Full submit response, headers then body.
pub fn print_submit_response(response: &HttpResponse) {
    println!("{} HTTP {}", "Submit:".cyan(), response.status);
    for (name, value) in &response.headers {
        println!("  {name}: {value}");
    }
    if !response.body.is_empty() {
        let pretty = serde_json::from_str::<serde_json::Value>(&response.body)
            .ok()
            .and_then(|v| serde_json::to_string_pretty(&v).ok());
        println!("{}", pretty.as_deref().unwrap_or(&response.body));
    }
}

pub fn print_poll(job_id: &str, event: &PollEvent) {
    let at = event
        .at
        .format(&Rfc3339)
        .unwrap_or_else(|_| event.at.to_string());
    let status = match event.status {
        0 => "no response".to_string(),
        s => format!("HTTP {s}"),
    };
    let progress = event
        .progress
        .as_deref()
        .map(|p| format!(" progress={p}"))
        .unwrap_or_default();
    println!(
        "[{at}] job {job_id} poll #{} {status} -> {}{progress}",
        event.poll, event.state
    );
}

pub fn print_job_result(job: &BulkImportJob) {
    match job.state() {
        JobState::Completed => print_success(&format!(
            "Import job {} completed after {} poll(s)",
            job.job_id,
            job.poll_count()
        )),
        state => {
            print_error(&format!("Import job {} {state}", job.job_id));
            for diag in render_diagnostics(&job.diagnostics) {
                eprintln!("    {}", diag.dimmed());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use octofhir_ingest::ResourceFile;

    use super::*;

    fn outcome(name: &str, result: UploadResult) -> FileOutcome {
        FileOutcome {
            file: ResourceFile::new(PathBuf::from(name), 1),
            result,
            attempts: Vec::new(),
        }
    }

    #[test]
    fn test_failure_lines_list_only_failed_files() {
        let report = LoadReport {
            outcomes: vec![
                outcome("practitionerInformation1.json", UploadResult::Success { status: 200 }),
                outcome(
                    "patient_1.json",
                    UploadResult::failure(FailureCause::HttpError(422)),
                ),
                outcome("patient_2.json", UploadResult::failure(FailureCause::Timeout)),
            ],
            ..Default::default()
        };

        let lines = failure_lines(&report);

        assert_eq!(
            lines,
            vec![
                "patient_1.json: HTTP 422".to_string(),
                "patient_2.json: timeout".to_string(),
            ]
        );
    }
}

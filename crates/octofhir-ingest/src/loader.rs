//! Dependency-ordered loading of a directory of FHIR bundles.
//!
//! Tier 1 (practitioners, facilities, payers) is uploaded one file at a time in
//! discovery order, because patient bundles reference those resources. Tier 2
//! starts only after every tier-1 file reached a terminal result, and is
//! drained by a fixed pool of workers pulling from a shared queue. Completion
//! order within tier 2 is unspecified.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use regex::Regex;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;

use crate::config::Tier1Policy;
use crate::error::Result;
use crate::model::{FileOutcome, ResourceFile, Tier};
use crate::worker::UploadWorker;

/// List files in `dir` whose names match `pattern`, sorted by name.
pub fn discover(dir: &Path, pattern: &Regex) -> Result<Vec<ResourceFile>> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let metadata = entry.metadata()?;
        if !metadata.is_file() {
            continue;
        }
        let name = entry.file_name();
        if pattern.is_match(&name.to_string_lossy()) {
            files.push(ResourceFile::new(entry.path(), metadata.len()));
        }
    }
    files.sort_by(|a, b| a.name.cmp(&b.name));
    tracing::debug!(dir = %dir.display(), count = files.len(), "Discovered input files");
    Ok(files)
}

/// Files split into tiers, each tier in discovery order.
#[derive(Debug, Clone, Default)]
pub struct LoadPlan {
    pub referential: Vec<ResourceFile>,
    pub dependent: Vec<ResourceFile>,
}

impl LoadPlan {
    pub fn from_files(files: Vec<ResourceFile>) -> Self {
        let (referential, dependent): (Vec<_>, Vec<_>) = files
            .into_iter()
            .partition(|f| f.tier() == Tier::Referential);
        Self {
            referential,
            dependent,
        }
    }

    pub fn len(&self) -> usize {
        self.referential.len() + self.dependent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierCounts {
    pub succeeded: usize,
    pub failed: usize,
}

impl TierCounts {
    fn record(&mut self, outcome: &FileOutcome) {
        if outcome.result.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Aggregate result of one loader run.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// In completion order.
    pub outcomes: Vec<FileOutcome>,
    pub referential: TierCounts,
    pub dependent: TierCounts,
    pub elapsed: Duration,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.referential.total() + self.dependent.total()
    }

    pub fn failed(&self) -> usize {
        self.referential.failed + self.dependent.failed
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| !o.result.is_success())
    }

    fn record(&mut self, outcome: FileOutcome) {
        match outcome.file.tier() {
            Tier::Referential => self.referential.record(&outcome),
            Tier::Dependent => self.dependent.record(&outcome),
        }
        self.outcomes.push(outcome);
    }
}

pub struct DependencyOrderedLoader {
    worker: Arc<UploadWorker>,
    concurrency: usize,
    tier1_policy: Tier1Policy,
}

impl DependencyOrderedLoader {
    pub fn new(worker: UploadWorker, concurrency: usize, tier1_policy: Tier1Policy) -> Self {
        Self {
            worker: Arc::new(worker),
            concurrency: concurrency.max(1),
            tier1_policy,
        }
    }

    pub async fn run(&self, plan: LoadPlan) -> LoadReport {
        self.run_with(plan, |_| {}).await
    }

    /// Run the plan, calling `on_outcome` as each file reaches its result.
    pub async fn run_with<F>(&self, plan: LoadPlan, mut on_outcome: F) -> LoadReport
    where
        F: FnMut(&FileOutcome),
    {
        let started = Instant::now();
        let mut report = LoadReport::default();

        if plan.is_empty() {
            tracing::info!("No input files matched; nothing to upload");
            return report;
        }

        tracing::info!(
            tier1 = plan.referential.len(),
            tier2 = plan.dependent.len(),
            concurrency = self.concurrency,
            "Starting dependency-ordered load"
        );

        let mut halted = false;
        for file in plan.referential {
            let outcome = if halted {
                FileOutcome::skipped(file)
            } else {
                self.worker.upload(&file).await
            };
            if !halted
                && !outcome.result.is_success()
                && self.tier1_policy == Tier1Policy::HaltTier
            {
                tracing::error!(file = %outcome.file.name, "Tier-1 upload failed; skipping remaining tier-1 files");
                halted = true;
            }
            on_outcome(&outcome);
            report.record(outcome);
        }

        self.run_pool(plan.dependent, &mut report, &mut on_outcome)
            .await;

        report.elapsed = started.elapsed();
        tracing::info!(
            total = report.total(),
            failed = report.failed(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Load finished"
        );
        report
    }

    async fn run_pool<F>(
        &self,
        files: Vec<ResourceFile>,
        report: &mut LoadReport,
        on_outcome: &mut F,
    ) where
        F: FnMut(&FileOutcome),
    {
        if files.is_empty() {
            return;
        }

        let (queue_tx, queue_rx) = mpsc::channel(files.len());
        for file in files {
            // capacity equals the number of files, so this never waits
            if queue_tx.send(file).await.is_err() {
                break;
            }
        }
        drop(queue_tx);
        let queue = Arc::new(Mutex::new(queue_rx));

        let (result_tx, mut result_rx) = mpsc::unbounded_channel();
        let mut workers = JoinSet::new();
        for worker_id in 0..self.concurrency {
            let queue = Arc::clone(&queue);
            let results = result_tx.clone();
            let worker = Arc::clone(&self.worker);
            workers.spawn(async move {
                loop {
                    let next = queue.lock().await.recv().await;
                    let Some(file) = next else { break };
                    tracing::debug!(worker_id, file = %file.name, "Worker picked file");
                    let outcome = worker.upload(&file).await;
                    if results.send(outcome).is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        while let Some(outcome) = result_rx.recv().await {
            on_outcome(&outcome);
            report.record(outcome);
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Upload worker task panicked");
            }
        }
    }
}

//! Ingestion of synthetic FHIR data into a FHIR store.
//!
//! Two paths are supported: per-file bundle upload in dependency order
//! ([`DependencyOrderedLoader`]) and server-side bulk `$import` jobs
//! ([`BulkImportJobClient`]).

pub mod artifacts;
pub mod bulk;
pub mod classifier;
pub mod config;
pub mod error;
pub mod loader;
pub mod model;
pub mod transport;
pub mod worker;

pub use artifacts::ArtifactLogger;
pub use bulk::{
    BulkImportJob, BulkImportJobClient, ImportInput, JobErrorKind, JobState, PollEvent,
    PollSleeper, TokioSleeper, import_parameters,
};
pub use classifier::{classify, render_diagnostics};
pub use config::{IngestConfig, Tier1Policy};
pub use error::{ErrorCategory, IngestError, Result, TransportError};
pub use loader::{DependencyOrderedLoader, LoadPlan, LoadReport, discover};
pub use model::{
    Diagnostic, Diagnostics, FailureCause, FileOutcome, ResourceCategory, ResourceFile, Tier,
    UploadAttempt, UploadResult,
};
pub use transport::{FhirTransport, HttpRequest, HttpResponse, ReqwestTransport};
pub use worker::UploadWorker;

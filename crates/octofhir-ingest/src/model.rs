//! Data model shared by the loader, the upload worker and the classifier.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use time::OffsetDateTime;

/// Dependency category inferred from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    Practitioner,
    Facility,
    Payer,
    PatientBundle,
    Other,
}

impl ResourceCategory {
    /// Infer the category from a file name, case-insensitively.
    pub fn from_file_name(name: &str) -> Self {
        let lower = name.to_ascii_lowercase();
        if lower.contains("practitioner") {
            Self::Practitioner
        } else if ["hospital", "facility", "organization", "location"]
            .iter()
            .any(|p| lower.contains(p))
        {
            Self::Facility
        } else if lower.contains("payer") {
            Self::Payer
        } else if lower.contains("patient") || SYNTHEA_PATIENT.is_match(&lower) {
            Self::PatientBundle
        } else {
            Self::Other
        }
    }

    pub fn tier(self) -> Tier {
        match self {
            Self::Practitioner | Self::Facility | Self::Payer => Tier::Referential,
            Self::PatientBundle | Self::Other => Tier::Dependent,
        }
    }
}

/// `Given_Family_<uuid>.json`, the naming Synthea uses for patient bundles.
static SYNTHEA_PATIENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"_[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}\.json$")
        .expect("static regex")
});

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Practitioner => write!(f, "practitioner"),
            Self::Facility => write!(f, "facility"),
            Self::Payer => write!(f, "payer"),
            Self::PatientBundle => write!(f, "patient-bundle"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Ordering bucket: tier 1 is loaded before tier 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    Referential = 1,
    Dependent = 2,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier {}", *self as u8)
    }
}

/// An input file found during discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceFile {
    pub path: PathBuf,
    pub name: String,
    pub category: ResourceCategory,
    pub size: u64,
}

impl ResourceFile {
    pub fn new(path: impl Into<PathBuf>, size: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let category = ResourceCategory::from_file_name(&name);
        Self {
            path,
            name,
            category,
            size,
        }
    }

    pub fn tier(&self) -> Tier {
        self.category.tier()
    }

    /// File name without extension; used to key artifacts.
    pub fn stem(&self) -> String {
        Path::new(&self.name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.name.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportOutcome {
    Success,
    Timeout,
    ConnectionError,
    Other,
}

impl fmt::Display for TransportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionError => write!(f, "connection-error"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// One HTTP attempt for one file.
#[derive(Debug, Clone)]
pub struct UploadAttempt {
    pub attempt: u32,
    pub started_at: OffsetDateTime,
    pub finished_at: OffsetDateTime,
    /// 0 when no response was received.
    pub status: u16,
    pub outcome: TransportOutcome,
    pub error: Option<String>,
    pub response_body: String,
    pub response_headers: Vec<(String, String)>,
}

impl UploadAttempt {
    pub fn duration(&self) -> Duration {
        (self.finished_at - self.started_at)
            .try_into()
            .unwrap_or_default()
    }
}

/// A single issue from an OperationOutcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Diagnostics {
    #[default]
    None,
    Issues(Vec<Diagnostic>),
    /// Leading lines of an unstructured body.
    Raw(String),
}


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    Timeout,
    ConnectionError,
    Transport(String),
    HttpError(u16),
    Io(String),
    /// Not attempted because of the tier-1 halt policy.
    Skipped,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timeout"),
            Self::ConnectionError => write!(f, "connection error"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
            Self::HttpError(status) => write!(f, "HTTP {status}"),
            Self::Io(msg) => write!(f, "read error: {msg}"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// Terminal classification of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    Success { status: u16 },
    Failure {
        cause: FailureCause,
        diagnostics: Diagnostics,
    },
}

impl UploadResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn failure(cause: FailureCause) -> Self {
        Self::Failure {
            cause,
            diagnostics: Diagnostics::None,
        }
    }
}

/// Everything known about one file once it reached its terminal result.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub file: ResourceFile,
    pub result: UploadResult,
    pub attempts: Vec<UploadAttempt>,
}

impl FileOutcome {
    pub fn skipped(file: ResourceFile) -> Self {
        Self {
            file,
            result: UploadResult::failure(FailureCause::Skipped),
            attempts: Vec::new(),
        }
    }

    /// Status of the last attempt, 0 when none produced a response.
    pub fn last_status(&self) -> u16 {
        self.attempts.last().map(|a| a.status).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_synthea_names() {
        assert_eq!(
            ResourceCategory::from_file_name("practitionerInformation1700000000.json"),
            ResourceCategory::Practitioner
        );
        assert_eq!(
            ResourceCategory::from_file_name("hospitalInformation1700000000.json"),
            ResourceCategory::Facility
        );
        assert_eq!(
            ResourceCategory::from_file_name("payerInformation1700000000.json"),
            ResourceCategory::Payer
        );
        assert_eq!(
            ResourceCategory::from_file_name(
                "Ada662_Sari509_Balistreri607_3d1e1b6c-4f3a-4a4b-9a3c-2b1d0e9f8a7b.json"
            ),
            ResourceCategory::PatientBundle
        );
        assert_eq!(
            ResourceCategory::from_file_name("patient-0001.json"),
            ResourceCategory::PatientBundle
        );
        assert_eq!(
            ResourceCategory::from_file_name("questionnaire_bundle.json"),
            ResourceCategory::Other
        );
    }

    #[test]
    fn test_tiers() {
        assert_eq!(ResourceCategory::Practitioner.tier(), Tier::Referential);
        assert_eq!(ResourceCategory::Facility.tier(), Tier::Referential);
        assert_eq!(ResourceCategory::Payer.tier(), Tier::Referential);
        assert_eq!(ResourceCategory::PatientBundle.tier(), Tier::Dependent);
        assert_eq!(ResourceCategory::Other.tier(), Tier::Dependent);
        assert!(Tier::Referential < Tier::Dependent);
        assert_eq!(Tier::Dependent.to_string(), "tier 2");
    }

    #[test]
    fn test_resource_file_stem() {
        let file = ResourceFile::new("/data/fhir/payerInformation1.json", 42);
        assert_eq!(file.name, "payerInformation1.json");
        assert_eq!(file.stem(), "payerInformation1");
        assert_eq!(file.category, ResourceCategory::Payer);
        assert_eq!(file.size, 42);
    }

    #[test]
    fn test_skipped_outcome_has_no_attempts() {
        let outcome = FileOutcome::skipped(ResourceFile::new("practitioner.json", 1));
        assert_eq!(outcome.last_status(), 0);
        assert!(!outcome.result.is_success());
        assert_eq!(
            outcome.result,
            UploadResult::failure(FailureCause::Skipped)
        );
    }
}

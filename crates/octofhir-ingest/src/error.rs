use thiserror::Error;

/// Transport-level failure: no HTTP response was received.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    /// Only timeouts and connection failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Connect(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if err.is_connect() {
            Self::Connect(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

/// Error types for ingestion operations
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("HTTP error: {status}")]
    Http { status: u16 },

    #[error("Bulk import job id not found in submit response (HTTP {status})")]
    JobIdNotFound { status: u16 },

    #[error("Bulk import job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },

    #[error("Bulk import job {job_id} errored: {reason}")]
    JobErrored { job_id: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("URL parsing error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid job state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl IngestError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn job_failed(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobFailed {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    pub fn job_errored(job_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::JobErrored {
            job_id: job_id.into(),
            reason: reason.into(),
        }
    }

    /// Get error category for logging
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Transport(_) => ErrorCategory::Transport,
            Self::Http { .. } => ErrorCategory::Http,
            Self::JobIdNotFound { .. }
            | Self::JobFailed { .. }
            | Self::JobErrored { .. }
            | Self::InvalidTransition { .. } => ErrorCategory::Job,
            Self::Io(_) | Self::Json(_) => ErrorCategory::Io,
            Self::Config(_) | Self::Url(_) | Self::Regex(_) => ErrorCategory::Configuration,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Transport,
    Http,
    Job,
    Io,
    Configuration,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport => write!(f, "transport"),
            Self::Http => write!(f, "http"),
            Self::Job => write!(f, "job"),
            Self::Io => write!(f, "io"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

pub type Result<T> = std::result::Result<T, IngestError>;

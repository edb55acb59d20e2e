use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub bulk: BulkConfig,
    #[serde(default)]
    pub artifacts: ArtifactConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.server.base_url)?;
        if self.upload.concurrency == 0 {
            return Err(IngestError::config("upload.concurrency must be > 0"));
        }
        regex::Regex::new(&self.upload.file_pattern)?;
        if self.bulk.poll_interval_ms == 0 {
            return Err(IngestError::config("bulk.poll_interval_ms must be > 0"));
        }
        if self.bulk.max_polls == Some(0) {
            return Err(IngestError::config("bulk.max_polls must be > 0 when set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl ServerConfig {
    /// Base URL without a trailing slash.
    pub fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/fhir".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

/// What to do when a tier-1 (referential) upload fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Tier1Policy {
    /// Log the failure and keep going.
    #[default]
    Continue,
    /// Skip the remaining tier-1 files; tier 2 still runs.
    HaltTier,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    #[serde(default = "default_input_dir")]
    pub input_dir: PathBuf,
    /// Regex matched against file names, e.g. `\.json$`. Globs like `*.json` are not accepted.
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Extra attempts after the first one, transport failures only.
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_true")]
    pub send_accept: bool,
    #[serde(default = "default_true")]
    pub prefer_minimal: bool,
    #[serde(default)]
    pub tier1_policy: Tier1Policy,
}

impl UploadConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Delay before attempt `attempt + 1`, doubling from the base and capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        if self.retry_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        Duration::from_millis(
            self.retry_backoff_ms
                .saturating_mul(factor)
                .min(MAX_BACKOFF_MS),
        )
    }
}

const MAX_BACKOFF_MS: u64 = 10_000;

fn default_input_dir() -> PathBuf {
    PathBuf::from("output/fhir")
}
fn default_file_pattern() -> String {
    r"\.json$".into()
}
fn default_concurrency() -> usize {
    4
}
fn default_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}
fn default_request_timeout_ms() -> u64 {
    300_000
}
fn default_true() -> bool {
    true
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            input_dir: default_input_dir(),
            file_pattern: default_file_pattern(),
            concurrency: default_concurrency(),
            retries: default_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            send_accept: true,
            prefer_minimal: true,
            tier1_policy: Tier1Policy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Unbounded when unset.
    #[serde(default)]
    pub max_polls: Option<u32>,
    #[serde(default = "default_bulk_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl BulkConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn default_poll_interval_ms() -> u64 {
    10_000
}
fn default_bulk_request_timeout_ms() -> u64 {
    60_000
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: None,
            request_timeout_ms: default_bulk_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub debug: bool,
}

impl LoggingConfig {
    pub fn effective_level(&self) -> &str {
        if self.debug { "debug" } else { &self.level }
    }
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            debug: false,
        }
    }
}

pub mod loader {
    use super::IngestConfig;
    use crate::error::{IngestError, Result};
    use config::{Config, Environment, File};
    use std::path::PathBuf;

    pub const DEFAULT_CONFIG_FILE: &str = "octofhir-ingest.toml";
    pub const ENV_PREFIX: &str = "OCTOFHIR_INGEST";

    pub fn load_config(path: Option<&str>) -> Result<IngestConfig> {
        let mut builder = Config::builder();
        match path {
            Some(p) => {
                let pathbuf = PathBuf::from(p);
                if !pathbuf.exists() {
                    return Err(IngestError::config(format!("config file not found: {p}")));
                }
                builder = builder.add_source(File::from(pathbuf));
            }
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    builder = builder.add_source(File::from(default_path));
                }
            }
        }
        // e.g. OCTOFHIR_INGEST__UPLOAD__CONCURRENCY=8
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .separator("__"),
        );
        let cfg = builder
            .build()
            .map_err(|e| IngestError::config(format!("config build error: {e}")))?;
        let merged: IngestConfig = cfg
            .try_deserialize()
            .map_err(|e| IngestError::config(format!("config deserialize error: {e}")))?;
        merged.validate()?;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = IngestConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.upload.concurrency, 4);
        assert_eq!(cfg.upload.retries, 3);
        assert_eq!(cfg.upload.tier1_policy, Tier1Policy::Continue);
        assert_eq!(cfg.bulk.max_polls, None);
        assert_eq!(cfg.server.base(), "http://localhost:8080/fhir");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut cfg = IngestConfig::default();
        cfg.upload.concurrency = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = IngestConfig::default();
        cfg.server.base_url = "not a url".into();
        assert!(matches!(cfg.validate(), Err(IngestError::Url(_))));

        let mut cfg = IngestConfig::default();
        cfg.upload.file_pattern = "[".into();
        assert!(matches!(cfg.validate(), Err(IngestError::Regex(_))));

        let mut cfg = IngestConfig::default();
        cfg.upload.file_pattern = "*.json".into();
        assert!(matches!(cfg.validate(), Err(IngestError::Regex(_))));

        let mut cfg = IngestConfig::default();
        cfg.bulk.poll_interval_ms = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let upload = UploadConfig {
            retry_backoff_ms: 500,
            ..Default::default()
        };
        assert_eq!(upload.backoff_for(1), Duration::from_millis(500));
        assert_eq!(upload.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(upload.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(upload.backoff_for(30), Duration::from_millis(MAX_BACKOFF_MS));

        let no_backoff = UploadConfig {
            retry_backoff_ms: 0,
            ..Default::default()
        };
        assert_eq!(no_backoff.backoff_for(3), Duration::ZERO);
    }

    #[test]
    fn test_load_config_from_toml_file() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("ingest.toml");
        std::fs::write(
            &path,
            r#"
[server]
base_url = "http://fhir.example.org/fhir/"

[upload]
concurrency = 2
retries = 1
tier1_policy = "halt-tier"

[bulk]
poll_interval_ms = 250
max_polls = 40
"#,
        )
        .expect("write toml");

        let cfg = loader::load_config(path.to_str()).expect("should parse config");
        assert_eq!(cfg.server.base(), "http://fhir.example.org/fhir");
        assert_eq!(cfg.upload.concurrency, 2);
        assert_eq!(cfg.upload.retries, 1);
        assert_eq!(cfg.upload.tier1_policy, Tier1Policy::HaltTier);
        assert_eq!(cfg.bulk.max_polls, Some(40));
        // untouched sections keep their defaults
        assert_eq!(cfg.artifacts.log_dir, PathBuf::from("logs"));
    }

    #[test]
    fn test_missing_explicit_config_file_is_an_error() {
        let err = loader::load_config(Some("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[test]
    fn test_debug_forces_debug_level() {
        let logging = LoggingConfig {
            level: "warn".into(),
            debug: true,
        };
        assert_eq!(logging.effective_level(), "debug");
    }
}

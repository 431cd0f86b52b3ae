use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Which artifact store a run writes to. Selected once at config load and
/// never mixed within a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3 {
        bucket: String,
        region: String,
        prefix: Option<String>,
        access_key: Option<String>,
        secret_key: Option<String>,
    },
}

/// Run configuration, loaded from a JSON file (default `./config.json`).
/// A missing file at the default path yields the defaults below; unknown
/// keys are rejected so that typos surface as config errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_access_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_secret_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s3_prefix: Option<String>,

    /// Consolidated bibliographic lookup service. Optional; when absent the
    /// DOI registry is the first metadata source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bibliographic_aggregator_url: Option<String>,
    #[serde(default = "default_doi_registry_url")]
    pub doi_registry_url: String,
    #[serde(default = "default_oa_locator_url")]
    pub oa_locator_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_structuring_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jats_transformer_path: Option<PathBuf>,

    /// Sent to upstream APIs that ask callers to identify themselves.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,

    /// Local PDF mirror for CORD-19 publisher content, consulted before any
    /// network fetch. Expects a `<path>/map.json` of PII -> relative path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cord19_publisher_pdf_path: Option<PathBuf>,
    /// A previous harvest tree to reuse PDFs from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_data_path: Option<PathBuf>,
    /// Local copy of the PMC OA file list (CSV of PMCID -> archive path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pmc_oa_list_path: Option<PathBuf>,

    #[serde(default = "default_per_host_limit")]
    pub per_host_limit: usize,
    #[serde(default = "default_per_stage_retries")]
    pub per_stage_retries: u32,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    /// Token-bucket rate applied to each metadata service, requests/second.
    #[serde(default = "default_metadata_requests_per_second")]
    pub metadata_requests_per_second: u32,

    #[serde(default = "default_metadata_timeout_secs")]
    pub metadata_timeout_secs: u64,
    #[serde(default = "default_pdf_timeout_secs")]
    pub pdf_timeout_secs: u64,
    #[serde(default = "default_jats_timeout_secs")]
    pub jats_timeout_secs: u64,
    #[serde(default = "default_pdf_structure_timeout_secs")]
    pub pdf_structure_timeout_secs: u64,
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,

    #[serde(default = "default_min_pdf_bytes")]
    pub min_pdf_bytes: u64,
    #[serde(default = "default_max_pdf_bytes")]
    pub max_pdf_bytes: u64,

    /// Raster tool invoked for thumbnail generation.
    #[serde(default = "default_thumbnail_tool")]
    pub thumbnail_tool: String,
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./data")
}
fn default_batch_size() -> usize {
    10
}
fn default_doi_registry_url() -> String {
    "https://api.crossref.org".to_string()
}
fn default_oa_locator_url() -> String {
    "https://api.unpaywall.org/v2".to_string()
}
fn default_per_host_limit() -> usize {
    4
}
fn default_per_stage_retries() -> u32 {
    3
}
fn default_max_backoff_secs() -> u64 {
    60
}
fn default_metadata_requests_per_second() -> u32 {
    5
}
fn default_metadata_timeout_secs() -> u64 {
    30
}
fn default_pdf_timeout_secs() -> u64 {
    120
}
fn default_jats_timeout_secs() -> u64 {
    120
}
fn default_pdf_structure_timeout_secs() -> u64 {
    600
}
fn default_grace_seconds() -> u64 {
    5
}
fn default_min_pdf_bytes() -> u64 {
    1024
}
fn default_max_pdf_bytes() -> u64 {
    100 * 1024 * 1024
}
fn default_thumbnail_tool() -> String {
    "convert".to_string()
}

impl Default for Config {
    fn default() -> Self {
        serde_json::from_str("{}").expect("empty config deserializes")
    }
}

impl Config {
    /// Load from `path`. `is_default_path` relaxes the missing-file case:
    /// running without an explicit `--config` and without a `./config.json`
    /// is a run with defaults, not an error.
    pub fn load(path: &Path, is_default_path: bool) -> Result<Self, ConfigError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && is_default_path => {
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };
        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        if self.per_host_limit == 0 {
            return Err(ConfigError::Invalid(
                "per_host_limit must be positive".into(),
            ));
        }
        if self.min_pdf_bytes >= self.max_pdf_bytes {
            return Err(ConfigError::Invalid(
                "min_pdf_bytes must be below max_pdf_bytes".into(),
            ));
        }
        if self.s3_bucket.is_some() != self.s3_region.is_some() {
            return Err(ConfigError::Invalid(
                "s3_bucket and s3_region must be set together".into(),
            ));
        }
        Ok(())
    }

    pub fn storage_backend(&self) -> StorageBackend {
        match (&self.s3_bucket, &self.s3_region) {
            (Some(bucket), Some(region)) => StorageBackend::S3 {
                bucket: bucket.clone(),
                region: region.clone(),
                prefix: self.s3_prefix.clone(),
                access_key: self.s3_access_key.clone(),
                secret_key: self.s3_secret_key.clone(),
            },
            _ => StorageBackend::Local,
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
    pub fn pdf_timeout(&self) -> Duration {
        Duration::from_secs(self.pdf_timeout_secs)
    }
    pub fn jats_timeout(&self) -> Duration {
        Duration::from_secs(self.jats_timeout_secs)
    }
    pub fn pdf_structure_timeout(&self) -> Duration {
        Duration::from_secs(self.pdf_structure_timeout_secs)
    }
    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.storage_backend(), StorageBackend::Local);
        assert_eq!(config.metadata_timeout(), Duration::from_secs(30));
        assert_eq!(config.pdf_structure_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let err = serde_json::from_str::<Config>(r#"{"data_pathh": "./x"}"#);
        assert!(err.is_err());
    }

    #[test]
    fn test_s3_backend_selection() {
        let config: Config = serde_json::from_str(
            r#"{"s3_bucket": "harvest", "s3_region": "us-east-1", "s3_prefix": "corpora/cord19"}"#,
        )
        .unwrap();
        match config.storage_backend() {
            StorageBackend::S3 { bucket, prefix, .. } => {
                assert_eq!(bucket, "harvest");
                assert_eq!(prefix.as_deref(), Some("corpora/cord19"));
            }
            other => panic!("expected S3 backend, got {other:?}"),
        }
    }

    #[test]
    fn test_validation() {
        for (json, ok) in [
            (r#"{"batch_size": 0}"#, false),
            (r#"{"s3_bucket": "b"}"#, false),
            (r#"{"min_pdf_bytes": 10, "max_pdf_bytes": 5}"#, false),
            (r#"{"batch_size": 24}"#, true),
        ] {
            let config: Config = serde_json::from_str(json).unwrap();
            assert_eq!(config.validate().is_ok(), ok, "{json}");
        }
    }
}

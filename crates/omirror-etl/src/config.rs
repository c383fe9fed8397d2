//! Runtime configuration
//!
//! One [`EtlConfig`] is built per run (from the environment, optionally a
//! `.env` file) and passed explicitly to every component.

use crate::error::{EtlError, Result};
use crate::retry::RetryPolicy;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

/// Root of the NCBI SRA mirroring reports.
pub const DEFAULT_MIRROR_URL: &str = "https://ftp.ncbi.nlm.nih.gov/sra/reports/Mirroring/";

/// Records buffered per SRA part file.
pub const DEFAULT_CHUNK_SIZE: usize = 2_500_000;

/// Per-request HTTP timeout in seconds.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 40;

/// Concurrent sub-index fetches while listing the mirror.
pub const DEFAULT_LISTING_CONCURRENCY: usize = 8;

/// EBI BioSamples search endpoint.
pub const DEFAULT_BIOSAMPLE_URL: &str = "https://www.ebi.ac.uk/biosamples/samples";

/// Samples requested per page.
pub const DEFAULT_BIOSAMPLE_PAGE_SIZE: u32 = 200;

/// Days fetched concurrently.
pub const DEFAULT_BIOSAMPLE_CONCURRENCY: usize = 20;

/// Records buffered per BioSample part file.
pub const DEFAULT_BIOSAMPLE_CHUNK_SIZE: usize = 1_000_000;

/// First day of the BioSample backfill.
pub const DEFAULT_BIOSAMPLE_START: &str = "2021-01-01";

/// NCBI BioSample full dump.
pub const DEFAULT_NCBI_BIOSAMPLE_URL: &str =
    "https://ftp.ncbi.nlm.nih.gov/biosample/biosample_set.xml.gz";

/// NCBI BioProject full dump.
pub const DEFAULT_NCBI_BIOPROJECT_URL: &str = "https://ftp.ncbi.nlm.nih.gov/bioproject/bioproject.xml";

/// Records buffered per NCBI dump part file.
pub const DEFAULT_NCBI_CHUNK_SIZE: usize = 500_000;

/// Seconds between liveness heartbeats.
pub const DEFAULT_HEARTBEAT_SECS: u64 = 60;

pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
pub const DEFAULT_RETRY_MAX_MS: u64 = 40_000;

/// ETL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlConfig {
    pub sra: SraConfig,
    pub biosample: BiosampleConfig,
    pub ncbi: NcbiConfig,
    pub http: HttpConfig,
    pub retry: RetryConfig,
    /// Local directory for staging part files before publishing
    /// (system temp dir when unset)
    pub staging_dir: Option<PathBuf>,
}

/// SRA mirror settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SraConfig {
    pub mirror_url: String,
    pub chunk_size: usize,
    pub listing_concurrency: usize,
}

/// EBI BioSample settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BiosampleConfig {
    pub base_url: String,
    pub page_size: u32,
    pub concurrency: usize,
    pub chunk_size: usize,
    pub heartbeat_secs: u64,
    pub start_date: NaiveDate,
}

/// NCBI BioSample / BioProject full-dump settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NcbiConfig {
    pub biosample_url: String,
    pub bioproject_url: String,
    pub chunk_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl EtlConfig {
    /// Load configuration from environment and defaults
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let start_date = match std::env::var("OMIRROR_BIOSAMPLE_START") {
            Ok(s) => NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| {
                EtlError::Config(format!("OMIRROR_BIOSAMPLE_START must be YYYY-MM-DD: {}", e))
            })?,
            Err(_) => default_biosample_start(),
        };

        let config = Self {
            sra: SraConfig {
                mirror_url: std::env::var("OMIRROR_MIRROR_URL")
                    .unwrap_or_else(|_| DEFAULT_MIRROR_URL.to_string()),
                chunk_size: env_parse("OMIRROR_CHUNK_SIZE", DEFAULT_CHUNK_SIZE),
                listing_concurrency: env_parse(
                    "OMIRROR_LISTING_CONCURRENCY",
                    DEFAULT_LISTING_CONCURRENCY,
                ),
            },
            biosample: BiosampleConfig {
                base_url: std::env::var("OMIRROR_BIOSAMPLE_URL")
                    .unwrap_or_else(|_| DEFAULT_BIOSAMPLE_URL.to_string()),
                page_size: env_parse("OMIRROR_BIOSAMPLE_PAGE_SIZE", DEFAULT_BIOSAMPLE_PAGE_SIZE),
                concurrency: env_parse(
                    "OMIRROR_BIOSAMPLE_CONCURRENCY",
                    DEFAULT_BIOSAMPLE_CONCURRENCY,
                ),
                chunk_size: env_parse("OMIRROR_BIOSAMPLE_CHUNK_SIZE", DEFAULT_BIOSAMPLE_CHUNK_SIZE),
                heartbeat_secs: env_parse("OMIRROR_HEARTBEAT_SECS", DEFAULT_HEARTBEAT_SECS),
                start_date,
            },
            ncbi: NcbiConfig {
                biosample_url: std::env::var("OMIRROR_NCBI_BIOSAMPLE_URL")
                    .unwrap_or_else(|_| DEFAULT_NCBI_BIOSAMPLE_URL.to_string()),
                bioproject_url: std::env::var("OMIRROR_NCBI_BIOPROJECT_URL")
                    .unwrap_or_else(|_| DEFAULT_NCBI_BIOPROJECT_URL.to_string()),
                chunk_size: env_parse("OMIRROR_NCBI_CHUNK_SIZE", DEFAULT_NCBI_CHUNK_SIZE),
            },
            http: HttpConfig {
                timeout_secs: env_parse("OMIRROR_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
                user_agent: default_user_agent(),
            },
            retry: RetryConfig {
                max_attempts: env_parse("OMIRROR_RETRY_MAX_ATTEMPTS", DEFAULT_RETRY_MAX_ATTEMPTS),
                base_delay_ms: env_parse("OMIRROR_RETRY_BASE_MS", DEFAULT_RETRY_BASE_MS),
                max_delay_ms: env_parse("OMIRROR_RETRY_MAX_MS", DEFAULT_RETRY_MAX_MS),
            },
            staging_dir: std::env::var("OMIRROR_STAGING_DIR").ok().map(PathBuf::from),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.sra.mirror_url.is_empty() {
            return Err(EtlError::Config("OMIRROR_MIRROR_URL cannot be empty".to_string()));
        }
        if self.sra.chunk_size == 0 || self.biosample.chunk_size == 0 || self.ncbi.chunk_size == 0 {
            return Err(EtlError::Config("chunk sizes must be greater than 0".to_string()));
        }
        if self.sra.listing_concurrency == 0 {
            return Err(EtlError::Config(
                "OMIRROR_LISTING_CONCURRENCY must be greater than 0".to_string(),
            ));
        }
        if self.biosample.base_url.is_empty() {
            return Err(EtlError::Config("OMIRROR_BIOSAMPLE_URL cannot be empty".to_string()));
        }
        if self.ncbi.biosample_url.is_empty() || self.ncbi.bioproject_url.is_empty() {
            return Err(EtlError::Config("NCBI dump urls cannot be empty".to_string()));
        }
        if self.biosample.concurrency == 0 {
            return Err(EtlError::Config(
                "OMIRROR_BIOSAMPLE_CONCURRENCY must be greater than 0".to_string(),
            ));
        }
        if self.biosample.page_size == 0 {
            return Err(EtlError::Config(
                "OMIRROR_BIOSAMPLE_PAGE_SIZE must be greater than 0".to_string(),
            ));
        }
        if self.biosample.heartbeat_secs == 0 {
            return Err(EtlError::Config("OMIRROR_HEARTBEAT_SECS must be greater than 0".to_string()));
        }
        if self.http.timeout_secs == 0 {
            return Err(EtlError::Config(
                "OMIRROR_HTTP_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(EtlError::Config(
                "OMIRROR_RETRY_MAX_ATTEMPTS must be greater than 0".to_string(),
            ));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(EtlError::Config(format!(
                "OMIRROR_RETRY_BASE_MS ({}) cannot be greater than OMIRROR_RETRY_MAX_MS ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        Ok(())
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http.timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.biosample.heartbeat_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.retry.max_attempts,
            Duration::from_millis(self.retry.base_delay_ms),
            Duration::from_millis(self.retry.max_delay_ms),
        )
    }

    /// Shared HTTP client carrying the configured timeout and user agent
    pub fn http_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .timeout(self.http_timeout())
            .user_agent(self.http.user_agent.clone())
            .build()?)
    }

    /// Client for long-lived body downloads. Only connecting is bounded by
    /// the configured timeout.
    pub fn stream_client(&self) -> Result<reqwest::Client> {
        Ok(reqwest::Client::builder()
            .connect_timeout(self.http_timeout())
            .user_agent(self.http.user_agent.clone())
            .build()?)
    }
}

fn default_user_agent() -> String {
    format!("omirror/{}", env!("CARGO_PKG_VERSION"))
}

fn default_biosample_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or(NaiveDate::MIN)
}

impl Default for EtlConfig {
    fn default() -> Self {
        Self {
            sra: SraConfig {
                mirror_url: DEFAULT_MIRROR_URL.to_string(),
                chunk_size: DEFAULT_CHUNK_SIZE,
                listing_concurrency: DEFAULT_LISTING_CONCURRENCY,
            },
            biosample: BiosampleConfig {
                base_url: DEFAULT_BIOSAMPLE_URL.to_string(),
                page_size: DEFAULT_BIOSAMPLE_PAGE_SIZE,
                concurrency: DEFAULT_BIOSAMPLE_CONCURRENCY,
                chunk_size: DEFAULT_BIOSAMPLE_CHUNK_SIZE,
                heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
                start_date: default_biosample_start(),
            },
            ncbi: NcbiConfig {
                biosample_url: DEFAULT_NCBI_BIOSAMPLE_URL.to_string(),
                bioproject_url: DEFAULT_NCBI_BIOPROJECT_URL.to_string(),
                chunk_size: DEFAULT_NCBI_CHUNK_SIZE,
            },
            http: HttpConfig {
                timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
                user_agent: default_user_agent(),
            },
            retry: RetryConfig {
                max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
                base_delay_ms: DEFAULT_RETRY_BASE_MS,
                max_delay_ms: DEFAULT_RETRY_MAX_MS,
            },
            staging_dir: None,
        }
    }
}

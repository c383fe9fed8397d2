//! Error types for the mirror pipelines

use thiserror::Error;

/// Result type for ETL operations
pub type Result<T> = std::result::Result<T, EtlError>;

/// Error types for mirror extraction and materialization
#[derive(Debug, Error)]
pub enum EtlError {
    /// Malformed mirror URL or date; scoped to a single entry
    #[error("Parse error: {0}")]
    Parse(String),

    /// A record does not fit the fixed columnar schema
    #[error("Schema violation at `{field}`: {reason}")]
    Schema { field: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Request timed out after {secs}s: {url}")]
    Timeout { url: String, secs: u64 },

    #[error("Gave up on {operation} after {attempts} attempts: {last_error}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last_error: Box<EtlError>,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    #[error("XML error: {0}")]
    Xml(String),

    /// Listing the remote mirror failed; fatal to the run
    #[error("Listing error: {0}")]
    Listing(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Common(#[from] omirror_common::CommonError),
}

impl EtlError {
    pub fn schema(field: impl Into<String>, reason: impl Into<String>) -> Self {
        EtlError::Schema {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Whether a fresh attempt at the same request could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            EtlError::Http(e) => {
                if let Some(status) = e.status() {
                    is_retryable_status(status.as_u16())
                } else {
                    // connect, timeout, body read and decode failures
                    true
                }
            },
            EtlError::HttpStatus { status, .. } => is_retryable_status(*status),
            EtlError::Timeout { .. } => true,
            _ => false,
        }
    }
}

fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..=599).contains(&status)
}

impl From<quick_xml::Error> for EtlError {
    fn from(err: quick_xml::Error) -> Self {
        EtlError::Xml(err.to_string())
    }
}

impl From<quick_xml::events::attributes::AttrError> for EtlError {
    fn from(err: quick_xml::events::attributes::AttrError) -> Self {
        EtlError::Xml(err.to_string())
    }
}

impl From<regex::Error> for EtlError {
    fn from(err: regex::Error) -> Self {
        EtlError::Parse(err.to_string())
    }
}

impl From<chrono::ParseError> for EtlError {
    fn from(err: chrono::ParseError) -> Self {
        EtlError::Parse(err.to_string())
    }
}

impl From<tokio::task::JoinError> for EtlError {
    fn from(err: tokio::task::JoinError) -> Self {
        EtlError::Task(err.to_string())
    }
}

//! omirror common library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the omirror workspace members:
//!
//! - **Error Handling**: common error type and result alias
//! - **Checksums**: streaming SHA-256 for published part files
//! - **Logging**: tracing subscriber setup and progress logging
//!
//! # Example
//!
//! ```no_run
//! use omirror_common::checksum::Sha256Summary;
//!
//! fn summarize(path: &str) -> omirror_common::Result<()> {
//!     let summary = Sha256Summary::from_file(path)?;
//!     println!("{} ({} bytes)", summary.hex, summary.bytes);
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use error::{CommonError, Result};

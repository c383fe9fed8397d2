//! omirror ETL library
//!
//! Mirrors public metadata feeds into partitioned Parquet datasets.
//!
//! # Pipelines
//!
//! - **SRA**: NCBI mirror snapshots (`*_set.xml.gz`), classified into the
//!   current batch and materialized per `{entity}/date=/stage=` partition
//! - **BioSample**: EBI BioSamples records, one partition per update day
//! - **NCBI dumps**: the BioSample and BioProject full XML dumps, one
//!   partition per run day
//!
//! Every partition is finished by a `_done.json` marker written after its
//! last part file, so interrupted runs resume where they stopped.
//!
//! # Example
//!
//! ```no_run
//! use omirror_etl::config::EtlConfig;
//! use omirror_etl::materialize::ChunkedMaterializer;
//! use omirror_etl::sra::{classify, PartitionCatalog, SraXmlSource};
//! use omirror_etl::storage::{self, StorageConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = EtlConfig::from_env()?;
//!     let storage = storage::open("./mirror", &StorageConfig::from_env()).await?;
//!     let entries = classify(&["https://ftp.ncbi.nlm.nih.gov/sra/reports/Mirroring/NCBI_SRA_Mirroring_20250101_Full/meta_study_set.xml.gz"]);
//!
//!     let catalog = PartitionCatalog::new(storage, ChunkedMaterializer::new(config.sra.chunk_size));
//!     let report = catalog.process(&entries, &SraXmlSource::from_config(&config)?).await;
//!     println!("{}", report);
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod biosample;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod materialize;
pub mod ncbi;
pub mod partition;
pub mod record;
pub mod report;
pub mod retry;
pub mod runner;
pub mod sra;
pub mod storage;

pub use error::{EtlError, Result};

//! omirror - metadata mirror ETL

use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use omirror_common::logging::{init_logging, LogConfig, LogLevel};
use omirror_etl::biosample::BiosampleExtractor;
use omirror_etl::config::EtlConfig;
use omirror_etl::materialize::ChunkedMaterializer;
use omirror_etl::ncbi::{DumpKind, NcbiDump, NcbiDumpExtractor, NcbiDumpSource};
use omirror_etl::report::RunReport;
use omirror_etl::sra::mirror::format_entries;
use omirror_etl::sra::{
    classify, Entity, EntryFilter, MirrorEntry, MirrorListing, PartitionCatalog, SraXmlSource,
};
use omirror_etl::storage::{self, StorageConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "omirror")]
#[command(author, version, about = "Mirror SRA and BioSample metadata into Parquet")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// NCBI SRA mirror snapshots
    #[command(subcommand)]
    Sra(SraCommand),

    /// EBI BioSample records
    #[command(subcommand)]
    Biosample(BiosampleCommand),

    /// NCBI BioSample / BioProject full dumps
    #[command(subcommand)]
    Ncbi(NcbiCommand),
}

#[derive(Subcommand, Debug)]
enum SraCommand {
    /// Materialize the current batch of mirror files
    Extract {
        /// Destination directory or s3://bucket/prefix
        #[arg(short, long, env = "OMIRROR_SRA_DEST")]
        dest: String,

        /// Only entries dated on or after this day
        #[arg(long)]
        since: Option<NaiveDate>,

        /// Only entries dated on or before this day
        #[arg(long)]
        until: Option<NaiveDate>,

        #[arg(long, value_enum, default_value_t = EntityArg::All)]
        entity: EntityArg,

        /// Print what would be processed and exit
        #[arg(long)]
        dry_run: bool,

        /// Stop after this many entries
        #[arg(long)]
        max_entries: Option<usize>,
    },

    /// Delete partitions of superseded snapshots
    Cleanup {
        /// Destination directory or s3://bucket/prefix
        #[arg(short, long, env = "OMIRROR_SRA_DEST")]
        dest: String,

        /// Print what would be deleted and exit
        #[arg(long)]
        dry_run: bool,
    },

    /// Print every mirror file with its batch classification
    ListEntries {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum BiosampleCommand {
    /// Materialize one partition per update day
    Extract {
        /// Destination directory or s3://bucket/prefix
        #[arg(short, long, env = "OMIRROR_BIOSAMPLE_DEST")]
        dest: String,

        /// First day (defaults to OMIRROR_BIOSAMPLE_START)
        #[arg(long)]
        start: Option<NaiveDate>,

        /// Last day (defaults to yesterday)
        #[arg(long)]
        end: Option<NaiveDate>,

        /// Days fetched concurrently
        #[arg(long)]
        concurrency: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
enum NcbiCommand {
    /// Materialize today's dumps, replacing earlier ones
    Extract {
        /// Destination directory or s3://bucket/prefix
        #[arg(short, long, env = "OMIRROR_NCBI_DEST")]
        dest: String,

        #[arg(long, value_enum, default_value_t = DumpArg::All)]
        only: DumpArg,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum DumpArg {
    Biosample,
    Bioproject,
    All,
}

impl DumpArg {
    fn kinds(self) -> Vec<DumpKind> {
        match self {
            DumpArg::Biosample => vec![DumpKind::Biosample],
            DumpArg::Bioproject => vec![DumpKind::Bioproject],
            DumpArg::All => DumpKind::ALL.to_vec(),
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum EntityArg {
    Study,
    Sample,
    Experiment,
    Run,
    All,
}

impl EntityArg {
    fn entity(self) -> Option<Entity> {
        match self {
            EntityArg::Study => Some(Entity::Study),
            EntityArg::Sample => Some(Entity::Sample),
            EntityArg::Experiment => Some(Entity::Experiment),
            EntityArg::Run => Some(Entity::Run),
            EntityArg::All => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("omirror")
        .build();

    // Environment variables take precedence
    let log_config = log_config.merge_env()?;
    let _guard = init_logging(&log_config)?;

    let config = EtlConfig::from_env().context("Invalid configuration")?;

    let report = match cli.command {
        Command::Sra(SraCommand::Extract {
            dest,
            since,
            until,
            entity,
            dry_run,
            max_entries,
        }) => {
            let filter = EntryFilter {
                entity: entity.entity(),
                since,
                until,
                max_entries,
            };
            sra_extract(&config, &dest, &filter, dry_run).await?
        },
        Command::Sra(SraCommand::Cleanup { dest, dry_run }) => {
            sra_cleanup(&config, &dest, dry_run).await?
        },
        Command::Sra(SraCommand::ListEntries { json }) => {
            let entries = list_entries(&config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print!("{}", format_entries(&entries));
            }
            None
        },
        Command::Biosample(BiosampleCommand::Extract {
            dest,
            start,
            end,
            concurrency,
        }) => Some(biosample_extract(&config, &dest, start, end, concurrency).await?),
        Command::Ncbi(NcbiCommand::Extract { dest, only }) => {
            Some(ncbi_extract(&config, &dest, only.kinds()).await?)
        },
    };

    let Some(report) = report else {
        return Ok(ExitCode::SUCCESS);
    };

    println!("{}", report);
    if report.has_failures() {
        error!(failed = report.failed.len(), "Run finished with failures");
        return Ok(ExitCode::FAILURE);
    }
    info!("Run complete");
    Ok(ExitCode::SUCCESS)
}

async fn list_entries(config: &EtlConfig) -> Result<Vec<MirrorEntry>> {
    let listing = MirrorListing::new(
        config.http_client()?,
        &config.sra.mirror_url,
        config.sra.listing_concurrency,
        config.retry_policy(),
    )?;
    let urls = listing
        .list_urls()
        .await
        .context("Failed to list mirror snapshots")?;
    Ok(classify(&urls))
}

async fn sra_extract(
    config: &EtlConfig,
    dest: &str,
    filter: &EntryFilter,
    dry_run: bool,
) -> Result<Option<RunReport>> {
    let entries = filter.apply(list_entries(config).await?);
    let current: Vec<MirrorEntry> =
        entries.iter().filter(|e| e.in_current_batch).cloned().collect();
    info!(
        entries = entries.len(),
        current = current.len(),
        "Classified mirror entries"
    );

    if dry_run {
        print!("{}", format_entries(&current));
        return Ok(None);
    }

    let storage = storage::open(dest, &StorageConfig::from_env())
        .await
        .with_context(|| format!("Failed to open destination {}", dest))?;
    let materializer =
        ChunkedMaterializer::new(config.sra.chunk_size).with_staging_dir(config.staging_dir.clone());
    let catalog = PartitionCatalog::new(storage, materializer);
    let source = SraXmlSource::from_config(config)?;

    Ok(Some(catalog.process(&current, &source).await))
}

async fn sra_cleanup(config: &EtlConfig, dest: &str, dry_run: bool) -> Result<Option<RunReport>> {
    let entries = list_entries(config).await?;

    if dry_run {
        let stale: Vec<MirrorEntry> =
            entries.iter().filter(|e| !e.in_current_batch).cloned().collect();
        print!("{}", format_entries(&stale));
        return Ok(None);
    }

    let storage = storage::open(dest, &StorageConfig::from_env())
        .await
        .with_context(|| format!("Failed to open destination {}", dest))?;
    let catalog = PartitionCatalog::new(storage, ChunkedMaterializer::new(config.sra.chunk_size));

    Ok(Some(catalog.cleanup(&entries).await))
}

async fn biosample_extract(
    config: &EtlConfig,
    dest: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    concurrency: Option<usize>,
) -> Result<RunReport> {
    let start = start.unwrap_or(config.biosample.start_date);
    // Today is still being updated
    let end = match end {
        Some(end) => end,
        None => Utc::now()
            .date_naive()
            .pred_opt()
            .context("No day before today")?,
    };

    let storage = storage::open(dest, &StorageConfig::from_env())
        .await
        .with_context(|| format!("Failed to open destination {}", dest))?;
    let extractor = Arc::new(BiosampleExtractor::from_config(config, storage)?);

    Ok(extractor
        .extract(
            start,
            end,
            concurrency.unwrap_or(config.biosample.concurrency),
            config.heartbeat_interval(),
        )
        .await)
}

async fn ncbi_extract(config: &EtlConfig, dest: &str, kinds: Vec<DumpKind>) -> Result<RunReport> {
    let dumps: Vec<NcbiDump> = kinds
        .into_iter()
        .map(|kind| NcbiDump::from_config(kind, config))
        .collect();

    let storage = storage::open(dest, &StorageConfig::from_env())
        .await
        .with_context(|| format!("Failed to open destination {}", dest))?;
    let extractor = NcbiDumpExtractor::from_config(config, storage);
    let source = NcbiDumpSource::from_config(config)?;

    Ok(extractor
        .extract(&dumps, Utc::now().date_naive(), &source)
        .await)
}

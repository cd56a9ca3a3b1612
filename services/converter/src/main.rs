//! ERA5 record archive to Zarr V3 converter.
//!
//! Each subcommand loads the YAML configuration, prints its result as JSON
//! on stdout and exits non-zero when any coordinate or chunk failed.

mod config_loader;

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use chunk_store::{ObjectStorage, StoreReader, StoreSchema, StoreWriter};
use conversion::{
    merge, ConversionConfig, Converter, FileRecordSource, LevelSelection, MaterializeOptions,
};
use era5_common::TimeAxis;

#[derive(Parser, Debug)]
#[command(name = "converter")]
#[command(about = "Convert ERA5 reanalysis records into Zarr V3 stores")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "CONVERTER_CONFIG", default_value = "/etc/converter/config.yaml")]
    config: String,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the partition plan
    Plan,
    /// Create or validate store metadata for every group
    Init,
    /// Convert every partition, or a single one, into the stores
    Convert {
        /// Only convert this plan entry; stores are not consolidated
        #[arg(long)]
        partition: Option<usize>,
    },
    /// Rebuild consolidated metadata of every configured store
    Consolidate,
    /// Extend a group's store to its configured date range
    Resize {
        #[arg(long)]
        group: String,
    },
    /// List scheduled records absent from the archive
    FindMissing {
        #[arg(long)]
        group: Option<String>,
    },
    /// Merge stores on a shared time axis, optionally writing the union
    Merge {
        /// Stores to merge, in priority order
        #[arg(long = "store", required = true)]
        stores: Vec<String>,

        /// Materialize the merged dataset into this store
        #[arg(long)]
        target: Option<String>,

        /// Level subset for the target: a named group or a comma list
        #[arg(long)]
        levels: Option<String>,

        /// Variables copied into the target (default: all)
        #[arg(long, value_delimiter = ',')]
        variables: Option<Vec<String>>,

        /// Time steps per chunk in the target
        #[arg(long, default_value_t = 48)]
        chunk_length: u64,
    },
}

#[derive(Serialize)]
struct StoreSummary {
    store: String,
    time: TimeAxis,
    chunk_length: u64,
    chunks: u64,
    arrays: Vec<String>,
}

impl From<&StoreSchema> for StoreSummary {
    fn from(s: &StoreSchema) -> Self {
        Self {
            store: s.name.clone(),
            time: s.time,
            chunk_length: s.chunk_length,
            chunks: s.chunk_count(),
            arrays: s.arrays.keys().cloned().collect(),
        }
    }
}

#[derive(Serialize)]
struct MergeSummary<'a> {
    time: &'a TimeAxis,
    variables: Vec<(&'a str, &'a str)>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},object_store=warn",
            args.log_level.to_lowercase()
        ))
    });

    // Logs go to stderr so stdout carries only the JSON result.
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = config_loader::load_config(&args.config)?;
    let storage = ObjectStorage::new(&config.storage).context("Failed to open store backend")?;

    match args.command {
        Command::Merge {
            stores,
            target,
            levels,
            variables,
            chunk_length,
        } => {
            merge_stores(
                &config,
                storage,
                stores,
                target,
                levels,
                variables,
                chunk_length,
            )
            .await
        }
        command => run_conversion(config, storage, command).await,
    }
}

fn record_source(config: &ConversionConfig) -> FileRecordSource {
    config
        .groups
        .iter()
        .fold(FileRecordSource::new(&config.source_root), |source, (id, group)| {
            source.with_layout(id.clone(), group.layout)
        })
}

async fn run_conversion(config: ConversionConfig, storage: ObjectStorage, command: Command) -> Result<()> {
    let source = Arc::new(record_source(&config));
    let writer = Arc::new(StoreWriter::new(storage));
    let converter = Converter::new(config, source, writer)?;
    info!(run_id = %converter.run_id(), "Converter ready");

    match command {
        Command::Plan => {
            println!("{}", converter.plan()?.to_json()?);
        }
        Command::Init => {
            let schemas = converter.init().await?;
            let summaries: Vec<StoreSummary> = schemas.values().map(StoreSummary::from).collect();
            print_json(&summaries)?;
        }
        Command::Convert { partition } => {
            let report = match partition {
                Some(index) => converter.run_partition(index).await?,
                None => converter.run().await?,
            };
            print_json(&report)?;
            if !report.is_success() {
                anyhow::bail!("Conversion finished with failures");
            }
        }
        Command::Consolidate => {
            print_json(&converter.consolidate().await?)?;
        }
        Command::Resize { group } => {
            let schema = converter.resize(&group).await?;
            print_json(&StoreSummary::from(&schema))?;
        }
        Command::FindMissing { group } => {
            let missing = converter.find_missing(group.as_deref()).await?;
            if !missing.is_empty() {
                warn!(count = missing.len(), "Records missing from archive");
            }
            print_json(&missing)?;
        }
        Command::Merge { .. } => anyhow::bail!("merge does not run a conversion"),
    }
    Ok(())
}

async fn merge_stores(
    config: &ConversionConfig,
    storage: ObjectStorage,
    stores: Vec<String>,
    target: Option<String>,
    levels: Option<String>,
    variables: Option<Vec<String>>,
    chunk_length: u64,
) -> Result<()> {
    let reader = Arc::new(StoreReader::new(storage.clone(), config.cache_bytes()));
    let merged = merge(reader, &stores).await?;

    let Some(target) = target else {
        return print_json(&MergeSummary {
            time: merged.axis(),
            variables: merged.variables().collect(),
        });
    };

    let options = MaterializeOptions {
        variables,
        levels: levels.as_deref().map(parse_levels).transpose()?,
        chunk_length,
        compression: config.compression,
    };
    anyhow::ensure!(options.chunk_length > 0, "chunk length must be positive");

    let writer = StoreWriter::new(storage);
    let report = merged.materialize(&writer, &target, &options).await?;
    print_json(&report)
}

/// A named level group (`weatherbench_13`) or a comma list (`500,850`).
fn parse_levels(arg: &str) -> Result<Vec<u32>> {
    let selection = if arg.chars().all(|c| c.is_ascii_digit() || c == ',' || c == ' ') {
        let levels = arg
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid level list {}", arg))?;
        LevelSelection::List(levels)
    } else {
        LevelSelection::Named(arg.to_string())
    };
    Ok(selection.resolve()?)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

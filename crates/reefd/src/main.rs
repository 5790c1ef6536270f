//! `reefd` — the Reef storage daemon and operator CLI.
//!
//! # Usage
//!
//! ```text
//! reefd -c reef.toml start                 # boot the engine and serve
//! reefd -c reef.toml info                  # aggregate capacity
//! reefd -c reef.toml mb photos             # create a bucket
//! reefd -c reef.toml put photos a/b.jpg ./b.jpg
//! reefd -c reef.toml get photos a/b.jpg ./out.jpg
//! reefd -c reef.toml ls photos a/
//! reefd -c reef.toml rm photos a/b.jpg
//! ```

mod config;
mod telemetry;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use reef_disk::{DiskApi, LocalDisk, MemDisk};
use reef_engine::StorageEngine;
use tracing::info;

use config::CliConfig;

#[derive(Parser)]
#[command(name = "reefd", version, about = "Reef erasure-coded object storage")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disk export paths; overrides the config file's disk set.
    #[arg(long = "disk", global = true)]
    disks: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Boot the engine and run until interrupted.
    Start,
    /// Print aggregate storage capacity.
    Info,
    /// Create a bucket.
    Mb {
        /// Bucket name.
        bucket: String,
    },
    /// Upload a file as an object.
    Put {
        /// Target bucket.
        bucket: String,
        /// Object key.
        key: String,
        /// Local file to upload.
        file: PathBuf,
    },
    /// Download an object to a file.
    Get {
        /// Source bucket.
        bucket: String,
        /// Object key.
        key: String,
        /// Destination file.
        file: PathBuf,
        /// Byte offset to start from.
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Bytes to read (defaults to the rest of the object).
        #[arg(long)]
        length: Option<u64>,
    },
    /// List objects in a bucket.
    Ls {
        /// Bucket to list.
        bucket: String,
        /// Key prefix filter.
        #[arg(default_value = "")]
        prefix: String,
        /// Group keys at `/` instead of listing recursively.
        #[arg(long)]
        shallow: bool,
    },
    /// Delete an object.
    Rm {
        /// Bucket holding the object.
        bucket: String,
        /// Object key.
        key: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = CliConfig::load(cli.config.as_deref()).context("loading config")?;
    telemetry::init(&config.log.level);

    let disks: Vec<Arc<dyn DiskApi>> = match config.backend() {
        "memory" => (0..config.memory_disks())
            .map(|i| Arc::new(MemDisk::new(format!("mem-{i}"), 1 << 32)) as Arc<dyn DiskApi>)
            .collect(),
        "file" => {
            let disk_paths = if cli.disks.is_empty() {
                config.node.disks.clone()
            } else {
                cli.disks.clone()
            };
            anyhow::ensure!(
                !disk_paths.is_empty(),
                "no disks configured; pass --disk or set [node].disks"
            );
            disk_paths
                .iter()
                .map(|path| {
                    LocalDisk::new(path)
                        .map(|d| Arc::new(d) as Arc<dyn DiskApi>)
                        .with_context(|| format!("opening disk {}", path.display()))
                })
                .collect::<Result<_>>()?
        }
        other => anyhow::bail!("unknown storage backend: {other:?}"),
    };

    let engine = StorageEngine::new(disks, config.engine_config()?)
        .await
        .context("bootstrapping engine")?;

    match cli.command {
        Commands::Start => {
            let info = engine.storage_info().await?;
            info!(
                disks = engine.disk_count(),
                total = info.total,
                free = info.free,
                "reefd running, press ctrl-c to stop"
            );
            tokio::signal::ctrl_c().await?;
            info!("shutting down");
        }
        Commands::Info => {
            let info = engine.storage_info().await?;
            println!("disks: {}", engine.disk_count());
            println!("total: {} bytes", info.total);
            println!("free:  {} bytes", info.free);
        }
        Commands::Mb { bucket } => {
            engine.make_bucket(&bucket).await?;
            println!("created bucket {bucket}");
        }
        Commands::Put { bucket, key, file } => {
            let size = tokio::fs::metadata(&file)
                .await
                .with_context(|| format!("reading {}", file.display()))?
                .len();
            let mut reader = tokio::fs::File::open(&file).await?;
            let info = engine
                .put_object(&bucket, &key, Some(size), &mut reader, BTreeMap::new())
                .await?;
            println!("stored {bucket}/{key} ({} bytes)", info.size);
        }
        Commands::Get {
            bucket,
            key,
            file,
            offset,
            length,
        } => {
            let length = match length {
                Some(length) => length,
                None => {
                    let stat = engine.stat_object(&bucket, &key).await?;
                    stat.size.saturating_sub(offset)
                }
            };
            let mut writer = tokio::fs::File::create(&file).await?;
            let written = engine
                .get_object(&bucket, &key, offset, length, &mut writer)
                .await?;
            println!("wrote {written} bytes to {}", file.display());
        }
        Commands::Ls {
            bucket,
            prefix,
            shallow,
        } => {
            let delimiter = if shallow { "/" } else { "" };
            let mut marker = String::new();
            loop {
                let page = engine
                    .list_objects(&bucket, &prefix, &marker, delimiter, 1000)
                    .await?;
                for dir in &page.prefixes {
                    println!("{dir}");
                }
                for object in &page.objects {
                    println!("{}\t{}\t{}", object.mod_time, object.size, object.key);
                }
                if !page.is_truncated {
                    break;
                }
                marker = page.next_marker;
            }
        }
        Commands::Rm { bucket, key } => {
            engine.delete_object(&bucket, &key).await?;
            println!("deleted {bucket}/{key}");
        }
    }
    Ok(())
}

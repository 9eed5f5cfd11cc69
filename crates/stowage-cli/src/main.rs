//! Stowage CLI: command-line access to disk and object-store backends.
//!
//! - `stowage ls <url> [prefix] [--recursive] [--match <name>]`
//! - `stowage get <url> <path>` writes the object to stdout
//! - `stowage put <url> <path> <file>`
//! - `stowage rm <url> <path>`
//! - `stowage pull <url> <prefix> <dir>` / `stowage push <url> <dir> <prefix>`

use std::path::PathBuf;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use stowage_core::{StorageBackend, StorageConfig};
use stowage_storage::open_storage;

/// Stowage - uniform access to local directories and object-store buckets
#[derive(Parser)]
#[command(name = "stowage")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Maximum concurrent per-object operations in bulk commands
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List objects under a prefix
    Ls {
        /// Storage URL (s3://bucket, gs://bucket, file:///dir or a path)
        url: String,

        /// Prefix to list under (default: the root)
        #[arg(default_value = "")]
        prefix: String,

        /// List every object below the prefix, with digests where available
        #[arg(long, short)]
        recursive: bool,

        /// Only list objects with this exact file name (implies --recursive)
        #[arg(long = "match")]
        match_name: Option<String>,
    },

    /// Print an object to stdout
    Get { url: String, path: String },

    /// Write a local file to an object
    Put {
        url: String,
        path: String,
        file: PathBuf,
    },

    /// Delete an object and everything under it
    Rm { url: String, path: String },

    /// Copy everything under a prefix into a local directory
    Pull {
        url: String,
        prefix: String,
        dir: PathBuf,
    },

    /// Upload a local file or directory under a prefix
    Push {
        url: String,
        dir: PathBuf,
        prefix: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let workers = cli.workers;

    match cli.command {
        Commands::Ls {
            url,
            prefix,
            recursive,
            match_name,
        } => {
            let storage = open(&url, workers).await?;
            list(storage.as_ref(), &prefix, recursive, match_name).await?;
        }
        Commands::Get { url, path } => {
            let storage = open(&url, workers).await?;
            let data = storage
                .get(&path)
                .await
                .with_context(|| format!("failed to read {path} from {url}"))?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        Commands::Put { url, path, file } => {
            let storage = open(&url, workers).await?;
            let data = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            storage
                .put(&path, Bytes::from(data))
                .await
                .with_context(|| format!("failed to write {path} to {url}"))?;
        }
        Commands::Rm { url, path } => {
            let storage = open(&url, workers).await?;
            storage
                .delete(&path)
                .await
                .with_context(|| format!("failed to delete {path} from {url}"))?;
        }
        Commands::Pull { url, prefix, dir } => {
            let storage = open(&url, workers).await?;
            storage
                .get_directory(&prefix, &dir)
                .await
                .with_context(|| format!("failed to copy {prefix} to {}", dir.display()))?;
        }
        Commands::Push { url, dir, prefix } => {
            let storage = open(&url, workers).await?;
            storage
                .put_path(&dir, &prefix)
                .await
                .with_context(|| format!("failed to upload {} to {prefix}", dir.display()))?;
        }
    }

    Ok(())
}

async fn open(url: &str, workers: Option<usize>) -> Result<std::sync::Arc<dyn StorageBackend>> {
    let mut config = StorageConfig::new(url);
    if let Some(workers) = workers {
        config = config.with_max_workers(workers);
    }
    open_storage(&config)
        .await
        .with_context(|| format!("failed to open storage at {url}"))
}

async fn list(
    storage: &dyn StorageBackend,
    prefix: &str,
    recursive: bool,
    match_name: Option<String>,
) -> Result<()> {
    if !recursive && match_name.is_none() {
        for path in storage.list(prefix).await? {
            println!("{path}");
        }
        return Ok(());
    }

    let mut entries = match match_name {
        Some(name) => storage.match_filenames_recursive(prefix, &name),
        None => storage.list_recursive(prefix),
    };
    let mut count = 0usize;
    while let Some(entry) = entries.next().await {
        let entry = entry.with_context(|| format!("failed to list {prefix}"))?;
        println!("{entry}");
        count += 1;
    }
    debug!(count, "Listing complete");
    Ok(())
}

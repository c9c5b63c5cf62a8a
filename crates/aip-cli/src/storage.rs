//! # Storage Subcommand
//!
//! Whole-store operations: a capacity report, and a sweep that deletes
//! partial files left behind by interrupted writes.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use aip_store::{FsObjectStore, ObjectStore};

/// Arguments for the `aip storage` subcommand.
#[derive(Args, Debug)]
pub struct StorageArgs {
    #[command(subcommand)]
    pub command: StorageCommand,
}

/// Storage subcommands.
#[derive(Subcommand, Debug)]
pub enum StorageCommand {
    /// Print capacity, free and used bytes.
    Capacity,

    /// Delete partial files older than a threshold.
    Sweep {
        /// Minimum age in seconds of a partial file before it is deleted.
        #[arg(long, default_value_t = 3600)]
        older_than_secs: u64,
    },
}

/// Execute the storage subcommand.
pub async fn run_storage(args: &StorageArgs, store: &FsObjectStore) -> Result<u8> {
    match &args.command {
        StorageCommand::Capacity => {
            let cap = store.capacity().await.context("capacity query failed")?;
            println!("location: {}", store.location());
            println!("capacity: {}", cap.capacity_bytes);
            println!("free:     {}", cap.free_bytes);
            println!("used:     {}", cap.used_bytes());
            Ok(0)
        }
        StorageCommand::Sweep { older_than_secs } => {
            let purged = store
                .purge_stale_partials(Duration::from_secs(*older_than_secs))
                .await
                .context("sweep failed")?;
            tracing::info!(purged, "partial files swept");
            println!("OK: purged {purged} partial file(s)");
            Ok(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn capacity_reports_on_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let args = StorageArgs {
            command: StorageCommand::Capacity,
        };
        assert_eq!(run_storage(&args, &store).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sweep_on_empty_store_purges_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let args = StorageArgs {
            command: StorageCommand::Sweep { older_than_secs: 0 },
        };
        assert_eq!(run_storage(&args, &store).await.unwrap(), 0);
    }
}

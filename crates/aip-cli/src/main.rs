//! # aip CLI Entry Point
//!
//! Assembles subcommands and dispatches to handler modules.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use aip_cli::digest::{run_digest, DigestArgs};
use aip_cli::object::{run_object, ObjectArgs};
use aip_cli::storage::{run_storage, StorageArgs};
use aip_store::FsObjectStore;

/// Archival object store toolchain.
///
/// Reads, writes and verifies package payloads directly against a
/// filesystem object store, bypassing the metadata catalog.
#[derive(Parser, Debug)]
#[command(name = "aip", version, about)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Object store root directory.
    #[arg(long, global = true, env = "AIP_STORAGE_ROOT", default_value = aip_cli::DEFAULT_STORAGE_ROOT)]
    root: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Put, get and verify individual payloads.
    Object(ObjectArgs),
    /// Print SHA-256 digests of local files.
    Digest(DigestArgs),
    /// Capacity report and partial-file sweeps.
    Storage(StorageArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match &cli.command {
        Commands::Digest(args) => run_digest(args),
        Commands::Object(args) => block_on(async {
            let store = FsObjectStore::new(&cli.root);
            run_object(args, &store).await
        }),
        Commands::Storage(args) => block_on(async {
            let store = FsObjectStore::new(&cli.root);
            run_storage(args, &store).await
        }),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn block_on<F>(fut: F) -> anyhow::Result<u8>
where
    F: std::future::Future<Output = anyhow::Result<u8>>,
{
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(fut)
}

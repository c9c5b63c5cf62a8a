//! # Digest Subcommand
//!
//! Prints the SHA-256 of local files in the lowercase hex form the upload
//! endpoints expect in `sipDigest` / `xmlDigest`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use aip_core::FixityVerifier;

/// Arguments for the `aip digest` subcommand.
#[derive(Args, Debug)]
pub struct DigestArgs {
    /// Files to digest.
    #[arg(value_name = "FILE", required = true)]
    pub files: Vec<PathBuf>,
}

/// Execute the digest subcommand.
pub fn run_digest(args: &DigestArgs) -> Result<u8> {
    let verifier = FixityVerifier::new();
    for path in &args.files {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let digest = verifier
            .digest(std::io::BufReader::new(file))
            .with_context(|| format!("failed to read {}", path.display()))?;
        println!("{digest}  {}", path.display());
    }
    Ok(0)
}

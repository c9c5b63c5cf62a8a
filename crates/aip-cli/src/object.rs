//! # Object Subcommand
//!
//! Direct access to a package's payloads in a filesystem object store.
//! An object is addressed by its package id plus, for metadata, the XML
//! version:
//!
//! - `--sip <id>` alone addresses the SIP payload.
//! - `--sip <id> --xml-version <n>` addresses XML version `n`.
//!
//! Writes go through the store's write-once protocol: an occupied key is
//! refused, never overwritten.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use tokio::io::AsyncWriteExt;

use aip_core::{FixityVerifier, SipId};
use aip_store::{FsObjectStore, Namespace, ObjectKey, ObjectReader, ObjectStore};

/// Arguments for the `aip object` subcommand.
#[derive(Args, Debug)]
pub struct ObjectArgs {
    #[command(subcommand)]
    pub command: ObjectCommand,
}

/// Package id and optional XML version.
#[derive(Args, Debug, Clone)]
pub struct ObjectRef {
    /// Package id (UUID).
    #[arg(long, value_name = "UUID")]
    pub sip: String,
    /// XML version. Addresses the SIP payload when omitted.
    #[arg(long, value_name = "N")]
    pub xml_version: Option<u32>,
}

impl ObjectRef {
    /// Resolve to a namespace and key.
    pub fn resolve(&self) -> Result<(Namespace, ObjectKey)> {
        let sip_id = SipId::parse(&self.sip).map_err(|e| anyhow::anyhow!("invalid --sip: {e}"))?;
        match self.xml_version {
            None => Ok((Namespace::Sip, ObjectKey::sip(&sip_id))),
            Some(0) => bail!("--xml-version starts at 1"),
            Some(v) => Ok((Namespace::Xml, ObjectKey::xml(&sip_id, v))),
        }
    }
}

/// Object subcommands.
#[derive(Subcommand, Debug)]
pub enum ObjectCommand {
    /// Write a local file as a payload and print its digest.
    Put {
        #[command(flatten)]
        object: ObjectRef,
        /// File to upload.
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Copy a payload to a file, or to stdout.
    Get {
        #[command(flatten)]
        object: ObjectRef,
        /// Output file. Stdout when omitted.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Recompute a payload's digest and compare it with an expected one.
    Verify {
        #[command(flatten)]
        object: ObjectRef,
        /// Expected SHA-256, 64 hex characters.
        #[arg(long)]
        digest: String,
    },
}

/// Execute the object subcommand.
pub async fn run_object(args: &ObjectArgs, store: &FsObjectStore) -> Result<u8> {
    match &args.command {
        ObjectCommand::Put { object, file } => cmd_put(store, object, file).await,
        ObjectCommand::Get { object, output } => cmd_get(store, object, output.as_deref()).await,
        ObjectCommand::Verify { object, digest } => cmd_verify(store, object, digest).await,
    }
}

async fn cmd_put(store: &FsObjectStore, object: &ObjectRef, file: &Path) -> Result<u8> {
    let (ns, key) = object.resolve()?;
    let handle = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {}", file.display()))?;
    let reader: ObjectReader = Box::new(handle);

    let digest = store
        .put(ns, &key, reader)
        .await
        .with_context(|| format!("put {ns}/{key} failed"))?;

    tracing::info!(namespace = %ns, key = %key, "object written");
    println!("OK: stored {ns}/{key} sha256={digest}");
    Ok(0)
}

async fn cmd_get(store: &FsObjectStore, object: &ObjectRef, output: Option<&Path>) -> Result<u8> {
    let (ns, key) = object.resolve()?;
    let mut reader = match store.get(ns, &key).await {
        Ok(r) => r,
        Err(e) if e.is_not_found() => {
            eprintln!("NOT FOUND: {ns}/{key}");
            return Ok(1);
        }
        Err(e) => return Err(e).with_context(|| format!("get {ns}/{key} failed")),
    };

    let copied = match output {
        Some(path) => {
            let mut out = tokio::fs::File::create(path)
                .await
                .with_context(|| format!("failed to create {}", path.display()))?;
            let n = tokio::io::copy(&mut reader, &mut out).await?;
            out.flush().await?;
            n
        }
        None => {
            let mut out = tokio::io::stdout();
            let n = tokio::io::copy(&mut reader, &mut out).await?;
            out.flush().await?;
            n
        }
    };

    tracing::info!(namespace = %ns, key = %key, bytes = copied, "object read");
    Ok(0)
}

async fn cmd_verify(store: &FsObjectStore, object: &ObjectRef, expected: &str) -> Result<u8> {
    let (ns, key) = object.resolve()?;
    let actual = match store.digest_of(ns, &key).await {
        Ok(d) => d,
        Err(e) if e.is_not_found() => {
            println!("FAIL: {ns}/{key} not found");
            return Ok(1);
        }
        Err(e) => return Err(e).with_context(|| format!("digest of {ns}/{key} failed")),
    };

    let matches = FixityVerifier::new()
        .matches(&actual, expected)
        .map_err(|e| anyhow::anyhow!("invalid --digest: {e}"))?;
    if matches {
        println!("OK: {ns}/{key} sha256={actual}");
        Ok(0)
    } else {
        println!("FAIL: {ns}/{key} sha256={actual} expected={}", expected.trim());
        Ok(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn object(sip: &SipId, xml_version: Option<u32>) -> ObjectRef {
        ObjectRef {
            sip: sip.to_string(),
            xml_version,
        }
    }

    #[test]
    fn resolve_addresses_sip_and_xml() {
        let id = SipId::new();
        let (ns, key) = object(&id, None).resolve().unwrap();
        assert_eq!(ns, Namespace::Sip);
        assert_eq!(key.as_str(), id.to_string());

        let (ns, key) = object(&id, Some(3)).resolve().unwrap();
        assert_eq!(ns, Namespace::Xml);
        assert_eq!(key.as_str(), format!("{id}_xml_3"));
    }

    #[test]
    fn resolve_rejects_bad_input() {
        let bad = ObjectRef {
            sip: "nope".into(),
            xml_version: None,
        };
        assert!(bad.resolve().is_err());
        assert!(object(&SipId::new(), Some(0)).resolve().is_err());
    }

    #[tokio::test]
    async fn put_get_verify_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path().join("store"));
        let id = SipId::new();
        let input = dir.path().join("in.bin");
        tokio::fs::write(&input, b"SIPDATA").await.unwrap();

        let put = ObjectArgs {
            command: ObjectCommand::Put {
                object: object(&id, None),
                file: input.clone(),
            },
        };
        assert_eq!(run_object(&put, &store).await.unwrap(), 0);

        // Write-once: a second put on the same key fails.
        assert!(run_object(&put, &store).await.is_err());

        let output = dir.path().join("out.bin");
        let get = ObjectArgs {
            command: ObjectCommand::Get {
                object: object(&id, None),
                output: Some(output.clone()),
            },
        };
        assert_eq!(run_object(&get, &store).await.unwrap(), 0);
        assert_eq!(tokio::fs::read(&output).await.unwrap(), b"SIPDATA");

        let good = FixityVerifier::new().digest_bytes(b"SIPDATA").to_hex();
        let verify = |digest: String| ObjectArgs {
            command: ObjectCommand::Verify {
                object: object(&id, None),
                digest,
            },
        };
        assert_eq!(run_object(&verify(good), &store).await.unwrap(), 0);
        let other = FixityVerifier::new().digest_bytes(b"other").to_hex();
        assert_eq!(run_object(&verify(other), &store).await.unwrap(), 1);
        assert!(run_object(&verify("zz".into()), &store).await.is_err());
    }

    #[tokio::test]
    async fn missing_object_exits_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(dir.path());
        let get = ObjectArgs {
            command: ObjectCommand::Get {
                object: object(&SipId::new(), Some(1)),
                output: Some(dir.path().join("out.bin")),
            },
        };
        assert_eq!(run_object(&get, &store).await.unwrap(), 1);
    }
}

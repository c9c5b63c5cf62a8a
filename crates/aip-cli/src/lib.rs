//! # aip-cli: Operator CLI for the Archival Object Store
//!
//! Provides the `aip` command-line interface for inspecting and repairing
//! a filesystem object store directly, without the HTTP service or the
//! catalog.
//!
//! ## Subcommands
//!
//! - `aip object`: Put, get and verify a package's SIP or XML payload.
//! - `aip digest`: SHA-256 of a local file, in the form uploads expect.
//! - `aip storage`: Capacity report and stale partial-file sweep.
//!
//! ```bash
//! aip digest package.zip
//! aip --root /srv/aip object put --sip 6f1c... package.zip
//! aip --root /srv/aip object verify --sip 6f1c... --xml-version 2 --digest ba78...
//! aip --root /srv/aip storage sweep --older-than-secs 3600
//! ```

pub mod digest;
pub mod object;
pub mod storage;

/// Default object store root, matching the service's `AIP_STORAGE_ROOT` default.
pub const DEFAULT_STORAGE_ROOT: &str = "./aip-data";

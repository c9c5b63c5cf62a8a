//! # aip-state: Archival Package Lifecycle
//!
//! Runtime-checked lifecycle for archival packages and the records the
//! metadata catalog persists.
//!
//! ## State Machine
//!
//! ```text
//!             finish creation          remove
//! PROCESSING ────────────────▶ ARCHIVED ──────▶ REMOVED
//!     ▲  │                         │               │
//!     │  │ finish deletion         │ register      │ register
//!     │  ▼                         │ deletion      │ deletion
//!     │ DELETED (terminal)         ▼               ▼
//!     └──────────────────────── PROCESSING ◀───────┘
//! ```
//!
//! PROCESSING covers both an in-flight creation and an in-flight hard
//! delete. CORRUPTED is never persisted; it is reported by an audit when
//! a recomputed digest disagrees with the recorded one.
//!
//! ## Records
//!
//! - [`AipSip`]: one package and its ordered metadata versions.
//! - [`AipXml`]: one metadata version. Versions are contiguous from 1.

pub mod record;
pub mod sip;

// ─── Lifecycle re-exports ───────────────────────────────────────────

pub use sip::{LifecycleError, SipState};

// ─── Record re-exports ──────────────────────────────────────────────

pub use record::{AipSip, AipXml, ArchivalObject};

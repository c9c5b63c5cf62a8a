//! # API Route Modules
//!
//! - `storage`: package upload, download, update, deletion, audit and
//!   storage state.
//! - `health`: liveness, readiness and Prometheus exposition.

pub mod health;
pub mod storage;

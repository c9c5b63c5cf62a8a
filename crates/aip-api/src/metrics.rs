//! # Service Metrics
//!
//! Metric names and recording helpers. Recording goes through the
//! `metrics` facade; without an installed recorder every call is a no-op,
//! which is what tests run with. The binary installs the Prometheus
//! recorder and serves it at `/metrics`.
//!
//! Label values are bounded: operation names and fixed result strings only,
//! never ids.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// ─── Archival operations ─────────────────────────────────────

/// Archival operations by outcome (counter).
///
/// Labels: `op` = store | update_xml | delete | remove, `result` = ok | error
const OPERATIONS_TOTAL: &str = "aip_operations_total";

/// Archival operation latency in seconds (histogram).
///
/// Labels: `op`
const OPERATION_DURATION_SECONDS: &str = "aip_operation_duration_seconds";

/// Uploads rejected because stored bytes did not match the declared digest (counter).
///
/// Labels: `namespace` = sip | xml
const CHECKSUM_MISMATCH_TOTAL: &str = "aip_checksum_mismatch_total";

/// Compensation steps that failed and left residue for reconciliation (counter).
const COMPENSATION_FAILURES_TOTAL: &str = "aip_compensation_failures_total";

/// Submissions rejected because the worker queue was full (counter).
const POOL_REJECTIONS_TOTAL: &str = "aip_worker_pool_rejections_total";

// ─── Reconciliation ──────────────────────────────────────────

/// Records repaired by the reconciliation sweep (counter).
///
/// Labels: `action` = compensated_creation | finished_deletion | compensated_xml | purged_partial
const RECONCILE_REPAIRS_TOTAL: &str = "aip_reconcile_repairs_total";

/// Reconciliation cycles by outcome (counter).
///
/// Labels: `result` = success | failure
const RECONCILE_RUNS_TOTAL: &str = "aip_reconcile_runs_total";

// ─── HTTP ────────────────────────────────────────────────────

/// HTTP requests by status class (counter).
///
/// Labels: `method`, `status` = 2xx | 3xx | 4xx | 5xx
const HTTP_REQUESTS_TOTAL: &str = "aip_http_requests_total";

/// Free bytes of the object store, sampled on storage state queries (gauge).
const STORAGE_FREE_BYTES: &str = "aip_storage_free_bytes";

/// Install the global Prometheus recorder.
pub fn install_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("failed to install Prometheus recorder: {e}"))
}

#[inline]
pub fn record_operation(op: &'static str, ok: bool, duration_secs: f64) {
    counter!(
        OPERATIONS_TOTAL,
        "op" => op,
        "result" => if ok { "ok" } else { "error" }
    )
    .increment(1);
    histogram!(OPERATION_DURATION_SECONDS, "op" => op).record(duration_secs);
}

#[inline]
pub fn record_checksum_mismatch(namespace: &'static str) {
    counter!(CHECKSUM_MISMATCH_TOTAL, "namespace" => namespace).increment(1);
}

#[inline]
pub fn record_compensation_failure() {
    counter!(COMPENSATION_FAILURES_TOTAL).increment(1);
}

#[inline]
pub fn record_pool_rejection() {
    counter!(POOL_REJECTIONS_TOTAL).increment(1);
}

#[inline]
pub fn record_reconcile_repair(action: &'static str, count: u64) {
    counter!(RECONCILE_REPAIRS_TOTAL, "action" => action).increment(count);
}

#[inline]
pub fn record_reconcile_run(ok: bool) {
    counter!(
        RECONCILE_RUNS_TOTAL,
        "result" => if ok { "success" } else { "failure" }
    )
    .increment(1);
}

#[inline]
pub fn record_http_request(method: String, status: u16) {
    let class = match status {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    };
    counter!(HTTP_REQUESTS_TOTAL, "method" => method, "status" => class).increment(1);
}

#[inline]
pub fn record_free_bytes(free: u64) {
    gauge!(STORAGE_FREE_BYTES).set(free as f64);
}

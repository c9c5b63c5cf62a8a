//! Service configuration.
//!
//! Read from environment variables. Every variable has a default except
//! `DATABASE_URL`, whose absence selects the in-memory catalog. A value
//! that is present but unparseable is an error, never silently replaced
//! by the default.

use std::path::PathBuf;
use std::time::Duration;

/// Runtime configuration of the archival service.
#[derive(Clone)]
pub struct AppConfig {
    /// HTTP port. Default: 8080.
    pub port: u16,
    /// Root directory of the filesystem object store.
    pub storage_root: PathBuf,
    /// PostgreSQL URL of the catalog. `None` selects the in-memory catalog.
    pub database_url: Option<String>,
    /// Worker pool size.
    pub workers: usize,
    /// Worker pool queue bound.
    pub queue_depth: usize,
    /// Deadline for a single object-store call.
    pub storage_deadline: Duration,
    /// Request body limit in bytes.
    pub max_upload_bytes: usize,
    /// Reconciliation interval. Zero disables the sweep.
    pub reconcile_interval: Duration,
    /// Age after which an in-flight record is considered abandoned.
    pub reconcile_stale_after: Duration,
    /// Emit JSON logs.
    pub log_json: bool,
    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("port", &self.port)
            .field("storage_root", &self.storage_root)
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("workers", &self.workers)
            .field("queue_depth", &self.queue_depth)
            .field("storage_deadline", &self.storage_deadline)
            .field("max_upload_bytes", &self.max_upload_bytes)
            .field("reconcile_interval", &self.reconcile_interval)
            .field("reconcile_stale_after", &self.reconcile_stale_after)
            .field("log_json", &self.log_json)
            .field("metrics_enabled", &self.metrics_enabled)
            .finish()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            storage_root: PathBuf::from("./aip-data"),
            database_url: None,
            workers: 4,
            queue_depth: 64,
            storage_deadline: Duration::from_secs(300),
            max_upload_bytes: 512 * 1024 * 1024,
            reconcile_interval: Duration::from_secs(600),
            reconcile_stale_after: Duration::from_secs(3600),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `PORT` (default: 8080)
    /// - `AIP_STORAGE_ROOT` (default: `./aip-data`)
    /// - `DATABASE_URL` (optional)
    /// - `AIP_WORKERS` (default: 4)
    /// - `AIP_QUEUE_DEPTH` (default: 64)
    /// - `AIP_STORAGE_DEADLINE_SECS` (default: 300)
    /// - `AIP_MAX_UPLOAD_BYTES` (default: 536870912)
    /// - `AIP_RECONCILE_INTERVAL_SECS` (default: 600, 0 disables)
    /// - `AIP_RECONCILE_STALE_SECS` (default: 3600)
    /// - `AIP_LOG_JSON` (default: false)
    /// - `AIP_METRICS_ENABLED` (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through `lookup` instead of the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let workers: usize = parse_or(&lookup, "AIP_WORKERS", defaults.workers)?;
        if workers == 0 {
            return Err(ConfigError::Invalid {
                var: "AIP_WORKERS",
                reason: "must be at least 1".into(),
            });
        }
        let queue_depth: usize = parse_or(&lookup, "AIP_QUEUE_DEPTH", defaults.queue_depth)?;
        if queue_depth == 0 {
            return Err(ConfigError::Invalid {
                var: "AIP_QUEUE_DEPTH",
                reason: "must be at least 1".into(),
            });
        }
        let deadline_secs: u64 = parse_or(
            &lookup,
            "AIP_STORAGE_DEADLINE_SECS",
            defaults.storage_deadline.as_secs(),
        )?;
        if deadline_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "AIP_STORAGE_DEADLINE_SECS",
                reason: "must be at least 1".into(),
            });
        }

        Ok(Self {
            port: parse_or(&lookup, "PORT", defaults.port)?,
            storage_root: lookup("AIP_STORAGE_ROOT")
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            workers,
            queue_depth,
            storage_deadline: Duration::from_secs(deadline_secs),
            max_upload_bytes: parse_or(&lookup, "AIP_MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
            reconcile_interval: Duration::from_secs(parse_or(
                &lookup,
                "AIP_RECONCILE_INTERVAL_SECS",
                defaults.reconcile_interval.as_secs(),
            )?),
            reconcile_stale_after: Duration::from_secs(parse_or(
                &lookup,
                "AIP_RECONCILE_STALE_SECS",
                defaults.reconcile_stale_after.as_secs(),
            )?),
            log_json: parse_bool_or(&lookup, "AIP_LOG_JSON", defaults.log_json)?,
            metrics_enabled: parse_bool_or(&lookup, "AIP_METRICS_ENABLED", defaults.metrics_enabled)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: format!("{raw:?}: {e}"),
        }),
    }
}

fn parse_bool_or<F>(lookup: &F, var: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid {
                var,
                reason: format!("{v:?} is not a boolean"),
            }),
        },
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let cfg = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.workers, 4);
        assert_eq!(cfg.queue_depth, 64);
        assert_eq!(cfg.storage_deadline, Duration::from_secs(300));
        assert_eq!(cfg.max_upload_bytes, 512 * 1024 * 1024);
        assert!(cfg.database_url.is_none());
        assert!(cfg.metrics_enabled);
        assert!(!cfg.log_json);
    }

    #[test]
    fn overrides_are_applied() {
        let cfg = AppConfig::from_lookup(lookup(&[
            ("PORT", "9090"),
            ("AIP_STORAGE_ROOT", "/srv/aip"),
            ("DATABASE_URL", "postgres://localhost/aip"),
            ("AIP_WORKERS", "8"),
            ("AIP_RECONCILE_INTERVAL_SECS", "0"),
            ("AIP_LOG_JSON", "TRUE"),
        ]))
        .unwrap();
        assert_eq!(cfg.port, 9090);
        assert_eq!(cfg.storage_root, PathBuf::from("/srv/aip"));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/aip"));
        assert_eq!(cfg.workers, 8);
        assert!(cfg.reconcile_interval.is_zero());
        assert!(cfg.log_json);
    }

    #[test]
    fn garbage_is_an_error_not_a_default() {
        let err = AppConfig::from_lookup(lookup(&[("AIP_WORKERS", "many")])).unwrap_err();
        assert!(err.to_string().contains("AIP_WORKERS"));
        assert!(AppConfig::from_lookup(lookup(&[("AIP_LOG_JSON", "maybe")])).is_err());
        assert!(AppConfig::from_lookup(lookup(&[("AIP_QUEUE_DEPTH", "0")])).is_err());
    }

    #[test]
    fn debug_redacts_database_url() {
        let cfg = AppConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://u:secret@h/db")]))
            .unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}

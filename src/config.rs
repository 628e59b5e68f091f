//! Planner configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EoqlError, EoqlResult};
use crate::materialize::MaterializationPolicy;
use crate::registry::{DEFAULT_LOOKUP_QUEUE, DEFAULT_LOOKUP_WORKERS};

/// Configuration for a [`Planner`](crate::Planner).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlannerConfig {
    /// Maximum time a single frame lookup may take (milliseconds).
    pub registry_timeout_ms: u64,
    /// Threads serving frame lookups.
    pub registry_workers: usize,
    /// Lookups allowed to wait for a worker before new ones are refused.
    pub registry_queue_capacity: usize,
    /// Concrete frame resolutions kept client-side.
    pub registry_cache_capacity: usize,
    /// Explicit defaults applied before validation. `None` disables
    /// materialization entirely.
    pub materialization: Option<MaterializationPolicy>,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            registry_timeout_ms: 2_000,
            registry_workers: DEFAULT_LOOKUP_WORKERS,
            registry_queue_capacity: DEFAULT_LOOKUP_QUEUE,
            registry_cache_capacity: 1024,
            materialization: None,
        }
    }
}

impl PlannerConfig {
    const MIN_TIMEOUT_MS: u64 = 1;

    /// Parses and validates a JSON configuration document.
    ///
    /// # Errors
    ///
    /// `Config` for malformed JSON, unknown keys or out-of-range values.
    pub fn from_json_str(s: &str) -> EoqlResult<Self> {
        let config: Self = serde_json::from_str(s)
            .map_err(|e| EoqlError::config(format!("invalid planner config: {e}")))?;
        config.validate()
    }

    /// Reads a JSON configuration file.
    ///
    /// # Errors
    ///
    /// `Io` when the file cannot be read, otherwise as [`Self::from_json_str`].
    pub fn from_json_file(path: impl AsRef<Path>) -> EoqlResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Rejects values the planner cannot operate with.
    ///
    /// # Errors
    ///
    /// `Config` describing the first offending value.
    pub fn validate(self) -> EoqlResult<Self> {
        if self.registry_timeout_ms < Self::MIN_TIMEOUT_MS {
            return Err(EoqlError::config(format!(
                "registry_timeout_ms must be at least {} (got {})",
                Self::MIN_TIMEOUT_MS,
                self.registry_timeout_ms
            )));
        }
        if self.registry_workers == 0 {
            return Err(EoqlError::config("registry_workers must be at least 1"));
        }
        if self.registry_queue_capacity == 0 {
            return Err(EoqlError::config(
                "registry_queue_capacity must be at least 1",
            ));
        }
        if let Some(time) = self
            .materialization
            .as_ref()
            .and_then(|m| m.time.as_ref())
        {
            if !time.is_well_formed() {
                return Err(EoqlError::config(format!(
                    "materialization.time is inverted: {time}"
                )));
            }
        }
        Ok(self)
    }

    /// [`Self::registry_timeout_ms`] as a duration.
    pub const fn registry_timeout(&self) -> Duration {
        Duration::from_millis(self.registry_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictPolicyKind;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = PlannerConfig::from_json_str("{}").unwrap();
        assert_eq!(config, PlannerConfig::default());
        assert_eq!(config.registry_timeout(), Duration::from_secs(2));
        assert!(config.materialization.is_none());
    }

    #[test]
    fn test_materialization_section() {
        let config = PlannerConfig::from_json_str(
            r#"{
                "registry_timeout_ms": 250,
                "materialization": {
                    "frame": {"frame_id": "F_official", "version": "2.0"},
                    "conflict_policy": "EXPOSE_ALL"
                }
            }"#,
        )
        .unwrap();
        let policy = config.materialization.unwrap();
        assert_eq!(policy.conflict_policy, Some(ConflictPolicyKind::ExposeAll));
        assert!(policy.time.is_none());
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = PlannerConfig::from_json_str(r#"{"registry_timeout": 5}"#).unwrap_err();
        assert!(matches!(err, EoqlError::Config { .. }));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let err = PlannerConfig::from_json_str(r#"{"registry_timeout_ms": 0}"#).unwrap_err();
        assert!(err.to_string().contains("registry_timeout_ms"));
    }

    #[test]
    fn test_empty_lookup_pool_rejected() {
        for key in ["registry_workers", "registry_queue_capacity"] {
            let err = PlannerConfig::from_json_str(&format!(r#"{{"{key}": 0}}"#)).unwrap_err();
            assert!(err.to_string().contains(key), "{err}");
        }
        let config =
            PlannerConfig::from_json_str(r#"{"registry_workers": 2, "registry_queue_capacity": 8}"#)
                .unwrap();
        assert_eq!(config.registry_workers, 2);
        assert_eq!(config.registry_queue_capacity, 8);
    }

    #[test]
    fn test_inverted_default_window_rejected() {
        let err = PlannerConfig::from_json_str(
            r#"{"materialization": {"time": {
                "kind": "BETWEEN",
                "start": "2025-02-01T00:00:00Z",
                "end": "2025-01-01T00:00:00Z"
            }}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("inverted"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"registry_cache_capacity": 8}}"#).unwrap();
        let config = PlannerConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.registry_cache_capacity, 8);
    }

    #[test]
    fn test_missing_file_is_io() {
        let dir = tempfile::tempdir().unwrap();
        let err = PlannerConfig::from_json_file(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, EoqlError::Io(_)));
    }
}

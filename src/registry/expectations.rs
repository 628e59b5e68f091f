//! Expectation registry.
//!
//! Mirrors the frame registry: versioned, append-only, and consulted
//! read-only by the validator when a caller opts into expectation
//! resolution.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::error::RegistryError;
use crate::expectation::ExpectationDefinition;
use crate::frame::LATEST_VERSION;
use crate::registry::{check_registrable_version, lock_err};

/// Resolves expectation references to concrete definitions.
///
/// Same contract as [`FrameRegistry`](crate::FrameRegistry): a `None` or
/// `"latest"` version resolves to the most recently registered version, and
/// a resolved version never changes content.
pub trait ExpectationRegistry: Send + Sync {
    /// Resolves `expectation_id` at `version`.
    ///
    /// # Errors
    ///
    /// `ExpectationNotFound` for an unknown expectation or version,
    /// `Unavailable` when the registry cannot answer.
    fn resolve(
        &self,
        expectation_id: &str,
        version: Option<&str>,
    ) -> Result<ExpectationDefinition, RegistryError>;

    /// Returns true if the reference resolves.
    fn exists(&self, expectation_id: &str, version: Option<&str>) -> bool {
        self.resolve(expectation_id, version).is_ok()
    }
}

impl<R: ExpectationRegistry + ?Sized> ExpectationRegistry for Arc<R> {
    fn resolve(
        &self,
        expectation_id: &str,
        version: Option<&str>,
    ) -> Result<ExpectationDefinition, RegistryError> {
        (**self).resolve(expectation_id, version)
    }
}

/// Append-only in-memory expectation store.
#[derive(Debug, Default)]
pub struct InMemoryExpectationRegistry {
    /// Versions per expectation, in registration order.
    expectations: RwLock<HashMap<String, Vec<ExpectationDefinition>>>,
}

impl InMemoryExpectationRegistry {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an expectation version. Re-registering identical content
    /// is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidVersion` for a blank or `"latest"` version,
    /// `ExpectationConflict` if the version exists with different content,
    /// `Unavailable` on a poisoned lock.
    pub fn register(&self, definition: ExpectationDefinition) -> Result<(), RegistryError> {
        check_registrable_version(definition.expectation_id(), definition.version())?;

        let mut expectations = self
            .expectations
            .write()
            .map_err(|_| lock_err("expectations"))?;
        let versions = expectations
            .entry(definition.expectation_id().to_string())
            .or_default();

        if let Some(existing) = versions.iter().find(|d| d.version() == definition.version()) {
            if *existing == definition {
                return Ok(());
            }
            return Err(RegistryError::ExpectationConflict {
                expectation_id: definition.expectation_id().to_string(),
                version: definition.version().to_string(),
            });
        }

        tracing::info!(
            expectation_id = definition.expectation_id(),
            version = definition.version(),
            frequency = %definition.rule().frequency,
            "expectation registered"
        );
        versions.push(definition);
        Ok(())
    }

    /// Versions of an expectation in registration order.
    ///
    /// # Errors
    ///
    /// `ExpectationNotFound` for an unknown expectation.
    pub fn list_versions(&self, expectation_id: &str) -> Result<Vec<String>, RegistryError> {
        let expectations = self
            .expectations
            .read()
            .map_err(|_| lock_err("expectations"))?;
        expectations
            .get(expectation_id)
            .map(|vs| vs.iter().map(|d| d.version().to_string()).collect())
            .ok_or_else(|| RegistryError::ExpectationNotFound {
                expectation_id: expectation_id.to_string(),
                version: None,
            })
    }

    /// Every registered version active at `at`, ordered by id then
    /// registration.
    ///
    /// # Errors
    ///
    /// `Unavailable` on a poisoned lock.
    pub fn list_active(
        &self,
        at: DateTime<Utc>,
    ) -> Result<Vec<ExpectationDefinition>, RegistryError> {
        let expectations = self
            .expectations
            .read()
            .map_err(|_| lock_err("expectations"))?;
        let mut ids: Vec<&String> = expectations.keys().collect();
        ids.sort();
        Ok(ids
            .into_iter()
            .flat_map(|id| &expectations[id])
            .filter(|d| d.is_active_at(at))
            .cloned()
            .collect())
    }
}

impl ExpectationRegistry for InMemoryExpectationRegistry {
    fn resolve(
        &self,
        expectation_id: &str,
        version: Option<&str>,
    ) -> Result<ExpectationDefinition, RegistryError> {
        let expectations = self
            .expectations
            .read()
            .map_err(|_| lock_err("expectations"))?;
        let not_found = || RegistryError::ExpectationNotFound {
            expectation_id: expectation_id.to_string(),
            version: version.map(str::to_string),
        };

        let versions = expectations.get(expectation_id).ok_or_else(not_found)?;
        let found = match version {
            None | Some(LATEST_VERSION) => versions.last(),
            Some(v) => versions.iter().find(|d| d.version() == v),
        };
        found.cloned().ok_or_else(not_found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expectation::{ExpectationFrequency, ExpectationRule};
    use chrono::TimeZone;

    fn t(month: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, 1, 0, 0, 0).unwrap()
    }

    fn store() -> InMemoryExpectationRegistry {
        let store = InMemoryExpectationRegistry::new();
        store
            .register(ExpectationDefinition::new("filing", "1", "Filing").active_between(None, Some(t(3))))
            .unwrap();
        store
            .register(
                ExpectationDefinition::new("filing", "2", "Filing")
                    .with_rule(ExpectationRule::new(ExpectationFrequency::Monthly))
                    .active_between(Some(t(3)), None),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_resolve_latest_and_pinned() {
        let s = store();
        assert_eq!(s.resolve("filing", None).unwrap().version(), "2");
        assert_eq!(s.resolve("filing", Some("latest")).unwrap().version(), "2");
        assert_eq!(s.resolve("filing", Some("1")).unwrap().version(), "1");
        assert!(s.exists("filing", Some("2")));
        assert!(!s.exists("filing", Some("7")));
    }

    #[test]
    fn test_unknown_expectation() {
        match store().resolve("payroll", Some("1")) {
            Err(RegistryError::ExpectationNotFound { expectation_id, version }) => {
                assert_eq!(expectation_id, "payroll");
                assert_eq!(version.as_deref(), Some("1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_conflicting_content_rejected() {
        let s = store();
        s.register(ExpectationDefinition::new("filing", "1", "Filing").active_between(None, Some(t(3))))
            .unwrap();
        let changed = ExpectationDefinition::new("filing", "1", "Filing (renamed)");
        assert!(matches!(
            s.register(changed),
            Err(RegistryError::ExpectationConflict { .. })
        ));
        assert_eq!(s.list_versions("filing").unwrap(), vec!["1", "2"]);
    }

    #[test]
    fn test_reserved_versions_rejected() {
        let s = InMemoryExpectationRegistry::new();
        for bad in ["latest", "", "  "] {
            assert!(matches!(
                s.register(ExpectationDefinition::new("filing", bad, "Filing")),
                Err(RegistryError::InvalidVersion { .. })
            ));
        }
    }

    #[test]
    fn test_list_active() {
        let s = store();
        let active: Vec<_> = s
            .list_active(t(2))
            .unwrap()
            .iter()
            .map(|d| d.version().to_string())
            .collect();
        assert_eq!(active, vec!["1"]);
        // Both bounds are inclusive.
        assert_eq!(s.list_active(t(3)).unwrap().len(), 2);
        assert_eq!(s.list_active(t(6)).unwrap()[0].version(), "2");
    }
}

//! Client-local resolution cache.
//!
//! Only concrete-version lookups are answered from the cache. A resolved
//! version is permanent, so a cached entry can never go stale; "latest"
//! lookups always go to the inner registry because the latest version moves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crate::error::RegistryError;
use crate::frame::{FrameDefinition, LATEST_VERSION};
use crate::registry::FrameRegistry;

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups passed to the inner registry.
    pub misses: u64,
    /// Cached resolutions.
    pub entries: usize,
}

/// Bounded cache in front of another registry.
///
/// When full, new resolutions are passed through without being cached;
/// nothing is evicted.
#[derive(Debug)]
pub struct CachingFrameRegistry<R> {
    inner: R,
    capacity: usize,
    entries: RwLock<HashMap<(String, String), FrameDefinition>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<R: FrameRegistry> CachingFrameRegistry<R> {
    /// Caches up to `capacity` concrete resolutions of `inner`.
    #[must_use]
    pub fn new(inner: R, capacity: usize) -> Self {
        Self {
            inner,
            capacity,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// The wrapped registry.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().map_or(0, |e| e.len()),
        }
    }

    fn cached(&self, frame_id: &str, version: &str) -> Option<FrameDefinition> {
        let entries = self.entries.read().ok()?;
        entries
            .get(&(frame_id.to_string(), version.to_string()))
            .cloned()
    }

    fn remember(&self, definition: &FrameDefinition) {
        // A poisoned cache only costs lookups; resolution still succeeds.
        let Ok(mut entries) = self.entries.write() else {
            return;
        };
        if entries.len() >= self.capacity {
            return;
        }
        entries
            .entry((
                definition.frame_id().to_string(),
                definition.resolved_version().to_string(),
            ))
            .or_insert_with(|| definition.clone());
    }
}

impl<R: FrameRegistry> FrameRegistry for CachingFrameRegistry<R> {
    fn resolve(
        &self,
        frame_id: &str,
        version: Option<&str>,
    ) -> Result<FrameDefinition, RegistryError> {
        let concrete = version.filter(|v| *v != LATEST_VERSION);

        if let Some(v) = concrete {
            if let Some(hit) = self.cached(frame_id, v) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(frame_id, version = v, "frame cache hit");
                return Ok(hit);
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let definition = self.inner.resolve(frame_id, version)?;
        self.remember(&definition);
        Ok(definition)
    }
}

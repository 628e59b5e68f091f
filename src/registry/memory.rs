//! In-memory frame registry.
//!
//! Thread-safe, append-only. Intended for embedded usage, tests, and as the
//! reference implementation of the registry contract.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::RegistryError;
use crate::frame::{FrameDefinition, LATEST_VERSION};
use crate::registry::{check_registrable_version, lock_err, FrameRegistry};

#[derive(Debug, Default)]
struct RegistryState {
    /// Versions per frame, in registration order.
    frames: HashMap<String, Vec<FrameDefinition>>,
}

/// Append-only in-memory registry.
#[derive(Debug, Default)]
pub struct InMemoryFrameRegistry {
    state: RwLock<RegistryState>,
}

impl InMemoryFrameRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a frame version.
    ///
    /// Re-registering identical content is a no-op.
    ///
    /// # Errors
    ///
    /// `InvalidVersion` for a blank or `"latest"` version, `VersionConflict`
    /// if the version already exists with different content, `Unavailable`
    /// on a poisoned lock.
    pub fn register(&self, definition: FrameDefinition) -> Result<(), RegistryError> {
        check_registrable_version(definition.frame_id(), definition.resolved_version())?;

        let mut state = self.state.write().map_err(|_| lock_err("frames"))?;
        let versions = state
            .frames
            .entry(definition.frame_id().to_string())
            .or_default();

        if let Some(existing) = versions
            .iter()
            .find(|d| d.resolved_version() == definition.resolved_version())
        {
            if existing.digest() == definition.digest() {
                return Ok(());
            }
            return Err(RegistryError::VersionConflict {
                frame_id: definition.frame_id().to_string(),
                version: definition.resolved_version().to_string(),
            });
        }

        tracing::info!(
            frame_id = definition.frame_id(),
            version = definition.resolved_version(),
            digest = %definition.digest(),
            "frame registered"
        );
        versions.push(definition);
        Ok(())
    }

    /// Versions of a frame in registration order.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown frame.
    pub fn list_versions(&self, frame_id: &str) -> Result<Vec<String>, RegistryError> {
        let state = self.state.read().map_err(|_| lock_err("frames"))?;
        state
            .frames
            .get(frame_id)
            .map(|vs| vs.iter().map(|d| d.resolved_version().to_string()).collect())
            .ok_or_else(|| RegistryError::NotFound {
                frame_id: frame_id.to_string(),
                version: None,
            })
    }

    /// Registered frame ids, sorted.
    ///
    /// # Errors
    ///
    /// `Unavailable` on a poisoned lock.
    pub fn frame_ids(&self) -> Result<Vec<String>, RegistryError> {
        let state = self.state.read().map_err(|_| lock_err("frames"))?;
        let mut ids: Vec<String> = state.frames.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

impl FrameRegistry for InMemoryFrameRegistry {
    fn resolve(
        &self,
        frame_id: &str,
        version: Option<&str>,
    ) -> Result<FrameDefinition, RegistryError> {
        let state = self.state.read().map_err(|_| lock_err("frames"))?;
        let not_found = || RegistryError::NotFound {
            frame_id: frame_id.to_string(),
            version: version.map(str::to_string),
        };

        let versions = state.frames.get(frame_id).ok_or_else(not_found)?;
        let found = match version {
            None | Some(LATEST_VERSION) => versions.last(),
            Some(v) => versions.iter().find(|d| d.resolved_version() == v),
        };
        found.cloned().ok_or_else(not_found)
    }
}

//! Registry clients.
//!
//! Registries are external, append-only systems consumed read-only by the
//! validator. This module defines the frame client contract and three layers:
//! - [`InMemoryFrameRegistry`]: reference store for embedded use and tests
//! - [`CachingFrameRegistry`]: the client-local cache of concrete resolutions
//! - [`DeadlineFrameRegistry`]: bounds lookup latency on a fixed worker pool,
//!   turning a slow registry into a `Timeout` failure
//!
//! plus the [`ExpectationRegistry`] contract absence queries resolve their
//! expectations through.

mod cache;
mod deadline;
mod expectations;
mod memory;

use std::sync::Arc;

use crate::error::RegistryError;
use crate::frame::{FrameDefinition, LATEST_VERSION};

pub use cache::{CacheStats, CachingFrameRegistry};
pub use deadline::{DeadlineFrameRegistry, DEFAULT_LOOKUP_QUEUE, DEFAULT_LOOKUP_WORKERS};
pub use expectations::{ExpectationRegistry, InMemoryExpectationRegistry};
pub use memory::InMemoryFrameRegistry;

/// Resolves frame references to concrete definitions.
///
/// # Contract
/// - A `None` (or `"latest"`) version resolves to the most recently
///   registered version of the frame.
/// - Once a version has been resolved it stays resolvable with the same
///   content; implementations never mutate or withdraw a resolved version.
/// - Implementations must be safe to call from many threads at once.
pub trait FrameRegistry: Send + Sync {
    /// Resolves `frame_id` at `version`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown frame or version, `Timeout`/`Unavailable`
    /// when the registry cannot answer.
    fn resolve(&self, frame_id: &str, version: Option<&str>)
        -> Result<FrameDefinition, RegistryError>;
}

impl<R: FrameRegistry + ?Sized> FrameRegistry for Arc<R> {
    fn resolve(
        &self,
        frame_id: &str,
        version: Option<&str>,
    ) -> Result<FrameDefinition, RegistryError> {
        (**self).resolve(frame_id, version)
    }
}

fn lock_err(context: &'static str) -> RegistryError {
    RegistryError::Unavailable {
        message: format!("poisoned lock: {context}"),
    }
}

/// `"latest"` is a lookup alias and a blank version is unaddressable; neither
/// may be registered.
fn check_registrable_version(id: &str, version: &str) -> Result<(), RegistryError> {
    if version.trim().is_empty() || version == LATEST_VERSION {
        return Err(RegistryError::InvalidVersion {
            id: id.to_string(),
            version: version.to_string(),
        });
    }
    Ok(())
}

//! Frames - named, versioned interpretation policies.
//!
//! Selecting a frame is a substantive claim, not configuration. A query names
//! a frame (optionally pinned to a version); the registry resolves it to a
//! concrete definition whose version and digest are carried by every IR and
//! plan for provenance.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Version string that asks the registry for the most recent version.
pub const LATEST_VERSION: &str = "latest";

/// A caller's reference to a frame; unresolved until the registry confirms it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FrameRef {
    /// Frame id in the registry.
    pub frame_id: String,

    /// Pinned version; `None` or `"latest"` resolves to the newest.
    #[serde(default)]
    pub version: Option<String>,
}

impl FrameRef {
    /// Creates a reference to the latest version of a frame.
    #[must_use]
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            version: None,
        }
    }

    /// Creates a reference pinned to a version.
    #[must_use]
    pub fn pinned(frame_id: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
            version: Some(version.into()),
        }
    }

    /// Returns true if this reference names a concrete version.
    #[must_use]
    pub fn is_pinned(&self) -> bool {
        self.version
            .as_deref()
            .is_some_and(|v| v != LATEST_VERSION)
    }
}

impl fmt::Display for FrameRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{v}", self.frame_id),
            None => write!(f, "{}", self.frame_id),
        }
    }
}

/// Stable blake3 digest of a frame definition (hex).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FrameDigest(String);

impl FrameDigest {
    /// The hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }
}

impl fmt::Display for FrameDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A frame reference after registry resolution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolvedFrame {
    /// Frame id.
    pub frame_id: String,
    /// Concrete version the registry answered with; never `"latest"`.
    pub resolved_version: String,
    /// Content digest of that version.
    pub digest: FrameDigest,
}

impl fmt::Display for ResolvedFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.frame_id, self.resolved_version)
    }
}

/// A fully resolved frame definition.
///
/// Opaque to the core beyond its identity, resolved version and digest.
/// The digest is recomputed whenever content changes, so two definitions
/// with the same digest have the same content. A deserialized definition
/// must carry the digest of its own content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FrameRecord")]
pub struct FrameDefinition {
    frame_id: String,
    resolved_version: String,
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    config: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    supersedes: Option<String>,
    digest: FrameDigest,
}

/// Wire shape of a definition before its digest is checked.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FrameRecord {
    frame_id: String,
    resolved_version: String,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default = "empty_config")]
    config: serde_json::Value,
    #[serde(default)]
    supersedes: Option<String>,
    #[serde(default)]
    digest: Option<FrameDigest>,
}

fn empty_config() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl TryFrom<FrameRecord> for FrameDefinition {
    type Error = String;

    /// Recomputes the digest; a recorded digest must match it.
    fn try_from(record: FrameRecord) -> Result<Self, Self::Error> {
        let mut def = Self {
            frame_id: record.frame_id,
            resolved_version: record.resolved_version,
            name: record.name,
            description: record.description,
            config: record.config,
            supersedes: record.supersedes,
            digest: FrameDigest(String::new()),
        };
        def.refresh_digest();
        match record.digest {
            Some(recorded) if recorded != def.digest => Err(format!(
                "frame '{}@{}' digest {recorded} does not match its content ({})",
                def.frame_id, def.resolved_version, def.digest
            )),
            _ => Ok(def),
        }
    }
}

#[derive(Serialize)]
struct DigestInput<'a> {
    frame_id: &'a str,
    resolved_version: &'a str,
    name: &'a str,
    description: Option<&'a str>,
    config: &'a serde_json::Value,
    supersedes: Option<&'a str>,
}

impl FrameDefinition {
    /// Creates a definition with an empty config.
    #[must_use]
    pub fn new(
        frame_id: impl Into<String>,
        version: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        let mut def = Self {
            frame_id: frame_id.into(),
            resolved_version: version.into(),
            name: name.into(),
            description: None,
            config: serde_json::Value::Object(serde_json::Map::new()),
            supersedes: None,
            digest: FrameDigest(String::new()),
        };
        def.refresh_digest();
        def
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self.refresh_digest();
        self
    }

    /// Sets the interpretation config (thresholds, definitions, exclusions...).
    #[must_use]
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        self.config = config;
        self.refresh_digest();
        self
    }

    /// Records the version this definition supersedes.
    #[must_use]
    pub fn superseding(mut self, version: impl Into<String>) -> Self {
        self.supersedes = Some(version.into());
        self.refresh_digest();
        self
    }

    fn refresh_digest(&mut self) {
        let input = DigestInput {
            frame_id: &self.frame_id,
            resolved_version: &self.resolved_version,
            name: &self.name,
            description: self.description.as_deref(),
            config: &self.config,
            supersedes: self.supersedes.as_deref(),
        };
        // Going through Value sorts struct and config keys alike.
        let canonical = serde_json::to_value(&input)
            .map(|v| v.to_string())
            .unwrap_or_default();
        self.digest = FrameDigest(blake3::hash(canonical.as_bytes()).to_hex().to_string());
    }

    /// Frame id.
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    /// Concrete version.
    pub fn resolved_version(&self) -> &str {
        &self.resolved_version
    }

    /// Human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Optional description.
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Interpretation config.
    pub fn config(&self) -> &serde_json::Value {
        &self.config
    }

    /// Version this definition replaces.
    pub fn supersedes(&self) -> Option<&str> {
        self.supersedes.as_deref()
    }

    /// Content digest.
    pub fn digest(&self) -> &FrameDigest {
        &self.digest
    }

    /// The resolved reference carried by IR and plans.
    #[must_use]
    pub fn resolved_ref(&self) -> ResolvedFrame {
        ResolvedFrame {
            frame_id: self.frame_id.clone(),
            resolved_version: self.resolved_version.clone(),
            digest: self.digest.clone(),
        }
    }

    /// A threshold from `config.thresholds`.
    #[must_use]
    pub fn threshold(&self, key: &str) -> Option<f64> {
        self.config.get("thresholds")?.get(key)?.as_f64()
    }

    /// Returns true if `config.exclusions` lists `entity_type`.
    #[must_use]
    pub fn is_excluded(&self, entity_type: &str) -> bool {
        self.config
            .get("exclusions")
            .and_then(serde_json::Value::as_array)
            .is_some_and(|xs| xs.iter().any(|x| x.as_str() == Some(entity_type)))
    }

    /// Compares two frame definitions section by section.
    #[must_use]
    pub fn compare(&self, other: &Self) -> FrameComparison {
        if self.digest == other.digest {
            return FrameComparison::default();
        }
        FrameComparison {
            same: false,
            thresholds: KeyDiff::between_objects(
                self.config.get("thresholds"),
                other.config.get("thresholds"),
            ),
            definitions: KeyDiff::between_objects(
                self.config.get("definitions"),
                other.config.get("definitions"),
            ),
            exclusions: KeyDiff::between_arrays(
                self.config.get("exclusions"),
                other.config.get("exclusions"),
            ),
        }
    }
}

/// Key-level differences of one config section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDiff {
    /// Keys only the first definition has.
    pub only_in_first: Vec<String>,
    /// Keys only the second definition has.
    pub only_in_second: Vec<String>,
    /// Keys present in both with different values.
    pub changed: Vec<String>,
}

impl KeyDiff {
    /// Returns true if the section is identical.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.only_in_first.is_empty() && self.only_in_second.is_empty() && self.changed.is_empty()
    }

    fn between_objects(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Self {
        let empty = serde_json::Map::new();
        let a = a.and_then(serde_json::Value::as_object).unwrap_or(&empty);
        let b = b.and_then(serde_json::Value::as_object).unwrap_or(&empty);

        let keys: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
        let mut diff = Self::default();
        for key in keys {
            match (a.get(key), b.get(key)) {
                (Some(_), None) => diff.only_in_first.push(key.clone()),
                (None, Some(_)) => diff.only_in_second.push(key.clone()),
                (Some(x), Some(y)) if x != y => diff.changed.push(key.clone()),
                _ => {}
            }
        }
        diff
    }

    fn between_arrays(a: Option<&serde_json::Value>, b: Option<&serde_json::Value>) -> Self {
        let as_set = |v: Option<&serde_json::Value>| -> BTreeSet<String> {
            v.and_then(serde_json::Value::as_array)
                .map(|xs| {
                    xs.iter()
                        .map(|x| x.as_str().map_or_else(|| x.to_string(), str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };
        let a = as_set(a);
        let b = as_set(b);
        Self {
            only_in_first: a.difference(&b).cloned().collect(),
            only_in_second: b.difference(&a).cloned().collect(),
            changed: Vec::new(),
        }
    }
}

/// Result of comparing two frame definitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameComparison {
    /// Digests are equal.
    pub same: bool,
    /// `config.thresholds` differences.
    pub thresholds: KeyDiff,
    /// `config.definitions` differences.
    pub definitions: KeyDiff,
    /// `config.exclusions` differences.
    pub exclusions: KeyDiff,
}

impl Default for FrameComparison {
    fn default() -> Self {
        Self {
            same: true,
            thresholds: KeyDiff::default(),
            definitions: KeyDiff::default(),
            exclusions: KeyDiff::default(),
        }
    }
}

impl FrameComparison {
    /// Sections that differ, by name.
    #[must_use]
    pub fn differing_sections(&self) -> BTreeMap<&'static str, &KeyDiff> {
        [
            ("thresholds", &self.thresholds),
            ("definitions", &self.definitions),
            ("exclusions", &self.exclusions),
        ]
        .into_iter()
        .filter(|(_, d)| !d.is_empty())
        .collect()
    }
}

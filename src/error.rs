//! Error types for EOQL.
//!
//! Every failure in EOQL is a value, not an exception: the validator,
//! registries, compilers and the canonical serializer all return strongly
//! typed errors built with thiserror. None of them are retryable, because
//! every one of them is semantic and re-submitting identical input yields
//! an identical failure.

use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of a soundness invariant.
///
/// `I0`..`I7` are enforced by the validator. `I8` (plan conflict policy is
/// byte-identical to the IR's) spans two artifacts and is only checked by
/// the compiler conformance suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum InvariantId {
    /// Target is present (and target-scoped selection is well-formed).
    I0,
    /// Frame is present and resolved by the registry.
    I1,
    /// Time is present and well-formed.
    I2,
    /// Mode and visibility are present.
    I3,
    /// EXISTS visibility requests visibility metadata.
    I4,
    /// Absence specs carry expectation, window and grounding.
    I5,
    /// Enabled traces are bounded and well-formed.
    I6,
    /// Conflict policy is declared; PICK_ONE carries a selection rule.
    I7,
    /// Plans declare exactly the conflict policy they were compiled from.
    I8,
}

impl InvariantId {
    /// All invariants, in check order.
    pub const ALL: [Self; 9] = [
        Self::I0,
        Self::I1,
        Self::I2,
        Self::I3,
        Self::I4,
        Self::I5,
        Self::I6,
        Self::I7,
        Self::I8,
    ];

    /// Short human-readable statement of the invariant.
    #[must_use]
    pub const fn describe(self) -> &'static str {
        match self {
            Self::I0 => "target must be declared",
            Self::I1 => "frame must be declared and resolvable",
            Self::I2 => "time must be declared and well-formed",
            Self::I3 => "mode and visibility must be declared",
            Self::I4 => "EXISTS visibility must request visibility metadata",
            Self::I5 => "absence requires expectation, window and grounding",
            Self::I6 => "trace requires max_depth >= 1 and well-formed predicates",
            Self::I7 => "conflict policy must be explicit; PICK_ONE requires a selection rule",
            Self::I8 => "plan must declare the conflict policy it was compiled from",
        }
    }
}

impl fmt::Display for InvariantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::I0 => "I0",
            Self::I1 => "I1",
            Self::I2 => "I2",
            Self::I3 => "I3",
            Self::I4 => "I4",
            Self::I5 => "I5",
            Self::I6 => "I6",
            Self::I7 => "I7",
            Self::I8 => "I8",
        };
        f.write_str(s)
    }
}

/// Errors reported by a frame or expectation registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The frame, or the requested version of it, is not registered.
    #[error("Frame not found: {frame_id}{}", version_suffix(.version))]
    NotFound {
        /// Requested frame.
        frame_id: String,
        /// Requested version; `None` for a latest lookup.
        version: Option<String>,
    },

    /// The registry did not answer within the lookup deadline.
    #[error("Frame lookup for '{frame_id}' timed out after {waited_ms}ms")]
    Timeout {
        /// Requested frame.
        frame_id: String,
        /// Deadline that elapsed.
        waited_ms: u64,
    },

    /// The registry cannot serve lookups (poisoned state, saturated or
    /// crashed workers).
    #[error("Frame registry unavailable: {message}")]
    Unavailable {
        /// What went wrong.
        message: String,
    },

    /// A version was registered twice with different content.
    #[error("Frame '{frame_id}' version '{version}' is already registered with different content")]
    VersionConflict {
        /// Registered frame.
        frame_id: String,
        /// Clashing version.
        version: String,
    },

    /// A definition was registered under a reserved or blank version.
    #[error("'{version}' is not a registrable version of '{id}'")]
    InvalidVersion {
        /// Frame or expectation id.
        id: String,
        /// Rejected version text.
        version: String,
    },

    /// The expectation, or the requested version of it, is not registered.
    #[error("Expectation not found: {expectation_id}{}", version_suffix(.version))]
    ExpectationNotFound {
        /// Requested expectation.
        expectation_id: String,
        /// Requested version; `None` for a latest lookup.
        version: Option<String>,
    },

    /// An expectation version was registered twice with different content.
    #[error("Expectation '{expectation_id}' version '{version}' is already registered with different content")]
    ExpectationConflict {
        /// Registered expectation.
        expectation_id: String,
        /// Clashing version.
        version: String,
    },
}

fn version_suffix(version: &Option<String>) -> String {
    version
        .as_deref()
        .map(|v| format!(" (version: {v})"))
        .unwrap_or_default()
}

/// A single validation failure.
///
/// Every variant exposes the `{invariant_id, field_path, message}` triple
/// through accessors so callers can render diagnostics uniformly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A structural invariant does not hold.
    #[error("{invariant} violated at '{field_path}': {message}")]
    Invariant {
        /// Broken invariant.
        invariant: InvariantId,
        /// Dotted path of the offending field.
        field_path: String,
        /// Human-readable explanation.
        message: String,
    },

    /// The frame reference was well-formed but the registry could not
    /// resolve it.
    #[error("I1 violated at 'frame': unresolved frame '{frame_id}': {reason}")]
    UnresolvedFrame {
        /// Requested frame.
        frame_id: String,
        /// Requested version, as written in the draft.
        version: Option<String>,
        /// Registry failure.
        reason: RegistryError,
    },
}

impl ValidationError {
    /// Creates an invariant violation.
    #[must_use]
    pub fn invariant(
        invariant: InvariantId,
        field_path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Invariant {
            invariant,
            field_path: field_path.into(),
            message: message.into(),
        }
    }

    /// The invariant this failure belongs to.
    #[must_use]
    pub const fn invariant_id(&self) -> InvariantId {
        match self {
            Self::Invariant { invariant, .. } => *invariant,
            Self::UnresolvedFrame { .. } => InvariantId::I1,
        }
    }

    /// Dotted path of the offending draft field.
    #[must_use]
    pub fn field_path(&self) -> &str {
        match self {
            Self::Invariant { field_path, .. } => field_path,
            Self::UnresolvedFrame { .. } => "frame",
        }
    }

    /// Human-readable explanation.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Invariant { message, .. } => message.clone(),
            Self::UnresolvedFrame { reason, .. } => reason.to_string(),
        }
    }

    /// Returns true if this is a registry resolution failure.
    #[must_use]
    pub const fn is_unresolved_frame(&self) -> bool {
        matches!(self, Self::UnresolvedFrame { .. })
    }
}

/// The complete, non-empty list of violations found in one validation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violations(Vec<ValidationError>);

impl Violations {
    /// Wraps a list of errors. Returns `None` when the list is empty.
    #[must_use]
    pub fn new(errors: Vec<ValidationError>) -> Option<Self> {
        if errors.is_empty() {
            None
        } else {
            Some(Self(errors))
        }
    }

    /// Wraps a single error.
    #[must_use]
    pub fn single(error: ValidationError) -> Self {
        Self(vec![error])
    }

    /// Returns true if any violation is tagged with `invariant`.
    #[must_use]
    pub fn has(&self, invariant: InvariantId) -> bool {
        self.0.iter().any(|e| e.invariant_id() == invariant)
    }

    /// Returns true if any violation is tagged `invariant` at `field_path`.
    #[must_use]
    pub fn has_at(&self, invariant: InvariantId, field_path: &str) -> bool {
        self.0
            .iter()
            .any(|e| e.invariant_id() == invariant && e.field_path() == field_path)
    }

    /// Violations tagged with `invariant`.
    pub fn for_invariant(&self, invariant: InvariantId) -> impl Iterator<Item = &ValidationError> {
        self.0.iter().filter(move |e| e.invariant_id() == invariant)
    }

    /// Consumes the wrapper.
    #[must_use]
    pub fn into_vec(self) -> Vec<ValidationError> {
        self.0
    }
}

impl Deref for Violations {
    type Target = [ValidationError];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl IntoIterator for Violations {
    type Item = ValidationError;
    type IntoIter = std::vec::IntoIter<ValidationError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "query failed validation ({} violation(s))", self.0.len())?;
        for e in &self.0 {
            write!(f, "\n- {e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Violations {}

/// Malformed draft wire form. Raised before any invariant check runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The input is not JSON.
    #[error("Invalid JSON at line {line}, column {column}: {message}")]
    InvalidJson {
        /// 1-based line.
        line: usize,
        /// 1-based column.
        column: usize,
        /// Parser message.
        message: String,
    },

    /// The input is JSON but not a draft (wrong types, unknown keys).
    #[error("Invalid draft shape at line {line}, column {column}: {message}")]
    InvalidShape {
        /// 1-based line.
        line: usize,
        /// 1-based column.
        column: usize,
        /// Parser message.
        message: String,
    },
}

impl From<serde_json::Error> for SchemaError {
    fn from(e: serde_json::Error) -> Self {
        let (line, column, message) = (e.line(), e.column(), e.to_string());
        match e.classify() {
            serde_json::error::Category::Data => Self::InvalidShape {
                line,
                column,
                message,
            },
            _ => Self::InvalidJson {
                line,
                column,
                message,
            },
        }
    }
}

/// Compiler refusals and failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    /// The backend lacks a capability the IR needs.
    #[error("Backend '{backend_id}' cannot honor {capability}: {reason}")]
    UnsupportedCapability {
        /// Refusing backend.
        backend_id: String,
        /// Missing capability, in its wire spelling.
        capability: String,
        /// Which part of the IR needs it.
        reason: String,
    },

    /// No compiler is registered under the id.
    #[error("Unknown backend: {backend_id}")]
    UnknownBackend {
        /// Requested backend.
        backend_id: String,
    },

    /// The payload could not be encoded or decoded.
    #[error("Failed to encode plan payload: {message}")]
    Payload {
        /// Encoder message.
        message: String,
    },
}

impl CompileError {
    /// Returns true if this is an explicit capability refusal.
    #[must_use]
    pub const fn is_refusal(&self) -> bool {
        matches!(self, Self::UnsupportedCapability { .. })
    }
}

/// Canonical wire form failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializationError {
    /// Bad JSON, or unknown or missing fields.
    #[error("Malformed wire form: {message}")]
    Malformed {
        /// Decoder message.
        message: String,
    },

    /// Foreign schema name or unsupported version.
    #[error("Unsupported wire schema: {found}")]
    UnsupportedSchema {
        /// `schema/version` as found in the envelope.
        found: String,
    },

    /// The decoded IR breaks an invariant.
    #[error("Wire form does not describe a valid IR: {0}")]
    InvalidIr(Violations),

    /// The input is not the canonical encoding of the IR it decodes to.
    #[error("Round trip is not isomorphic: {detail}")]
    NotIsomorphic {
        /// First differing path.
        detail: String,
    },
}

/// Top-level error type for EOQL.
#[derive(Debug, Error)]
pub enum EoqlError {
    /// Malformed draft input.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// The draft failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] Violations),

    /// Registry failure outside validation.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Compiler refusal or failure.
    #[error("Compile error: {0}")]
    Compile(#[from] CompileError),

    /// Canonical wire form failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Invalid planner configuration.
    #[error("Configuration error: {message}")]
    Config {
        /// Offending value.
        message: String,
    },

    /// Reading configuration or audit files failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EoqlError {
    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Returns true if this is a schema error.
    #[must_use]
    pub const fn is_schema(&self) -> bool {
        matches!(self, Self::Schema(_))
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a compiler refusal or failure.
    #[must_use]
    pub const fn is_compile(&self) -> bool {
        matches!(self, Self::Compile(_))
    }

    /// Returns true if this is a serialization error.
    #[must_use]
    pub const fn is_serialization(&self) -> bool {
        matches!(self, Self::Serialization(_))
    }

    /// The violations, if this is a validation error.
    #[must_use]
    pub const fn violations(&self) -> Option<&Violations> {
        match self {
            Self::Validation(v) => Some(v),
            _ => None,
        }
    }

    /// Always false: every EOQL failure is semantic and deterministic.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        false
    }
}

/// Result type alias for EOQL operations.
pub type EoqlResult<T> = Result<T, EoqlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_display() {
        assert_eq!(InvariantId::I0.to_string(), "I0");
        assert_eq!(InvariantId::I7.to_string(), "I7");
        assert_eq!(InvariantId::ALL.len(), 9);
    }

    #[test]
    fn test_invariant_serialization() {
        let json = serde_json::to_string(&InvariantId::I5).unwrap();
        assert_eq!(json, "\"I5\"");
    }

    #[test]
    fn test_validation_error_accessors() {
        let err = ValidationError::invariant(InvariantId::I2, "time", "time must be provided");
        assert_eq!(err.invariant_id(), InvariantId::I2);
        assert_eq!(err.field_path(), "time");
        assert_eq!(err.message(), "time must be provided");
        assert!(format!("{err}").contains("I2"));
    }

    #[test]
    fn test_unresolved_frame_reports_i1() {
        let err = ValidationError::UnresolvedFrame {
            frame_id: "risk-v3".to_string(),
            version: None,
            reason: RegistryError::NotFound {
                frame_id: "risk-v3".to_string(),
                version: None,
            },
        };
        assert_eq!(err.invariant_id(), InvariantId::I1);
        assert_eq!(err.field_path(), "frame");
        assert!(err.is_unresolved_frame());
        assert!(err.message().contains("risk-v3"));
    }

    #[test]
    fn test_invalid_version_message() {
        let err = RegistryError::InvalidVersion {
            id: "F".to_string(),
            version: "latest".to_string(),
        };
        assert_eq!(err.to_string(), "'latest' is not a registrable version of 'F'");
    }

    #[test]
    fn test_registry_error_version_suffix() {
        let err = RegistryError::NotFound {
            frame_id: "F".to_string(),
            version: Some("2.0".to_string()),
        };
        assert_eq!(err.to_string(), "Frame not found: F (version: 2.0)");
    }

    #[test]
    fn test_violations_non_empty() {
        assert!(Violations::new(Vec::new()).is_none());

        let v = Violations::new(vec![
            ValidationError::invariant(InvariantId::I1, "frame", "missing"),
            ValidationError::invariant(InvariantId::I2, "time", "missing"),
        ])
        .unwrap();
        assert_eq!(v.len(), 2);
        assert!(v.has(InvariantId::I1));
        assert!(v.has_at(InvariantId::I2, "time"));
        assert!(!v.has(InvariantId::I7));
        let msg = v.to_string();
        assert!(msg.contains("2 violation(s)"));
        assert!(msg.contains("frame"));
    }

    #[test]
    fn test_schema_error_from_serde() {
        let err = serde_json::from_str::<u32>("\"nope\"").unwrap_err();
        assert!(matches!(SchemaError::from(err), SchemaError::InvalidShape { .. }));

        let err = serde_json::from_str::<u32>("{").unwrap_err();
        assert!(matches!(SchemaError::from(err), SchemaError::InvalidJson { .. }));
    }

    #[test]
    fn test_compile_error_refusal() {
        let err = CompileError::UnsupportedCapability {
            backend_id: "graph".to_string(),
            capability: "grounding_traversal".to_string(),
            reason: "no traversal operator".to_string(),
        };
        assert!(err.is_refusal());
        assert!(!CompileError::UnknownBackend {
            backend_id: "x".to_string()
        }
        .is_refusal());
    }

    #[test]
    fn test_eoql_error_never_retryable() {
        let err: EoqlError = CompileError::UnknownBackend {
            backend_id: "x".to_string(),
        }
        .into();
        assert!(err.is_compile());
        assert!(!err.is_retryable());

        let err = EoqlError::config("bad timeout");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("bad timeout"));
    }
}

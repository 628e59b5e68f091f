//! Absence specifications.
//!
//! Absence is computed, never retrieved: it is a structural object describing
//! an expected-but-unobserved event, not a missing value. The core only checks
//! that an absence question carries the coordinates a backend needs to
//! compute it (expectation, window, grounding). Deciding whether the expected
//! thing actually failed to occur is a backend responsibility.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{InvariantId, RegistryError, ValidationError};
use crate::expectation::ResolvedExpectation;
use crate::ir::Target;
use crate::time::TimeSpec;
use crate::value::Value;

/// A reference to an assertion or source backing an expectation.
///
/// Opaque to the core beyond being a non-empty pointer.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroundingPointer(String);

impl GroundingPointer {
    /// Creates a pointer.
    #[must_use]
    pub fn new(pointer: impl Into<String>) -> Self {
        Self(pointer.into())
    }

    /// The pointer text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for GroundingPointer {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for GroundingPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pointer to an expectation rule held by an external expectation store.
///
/// Whether the expectation defines its own window is a property of the
/// stored rule, so the reference carries nothing but the coordinates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpectationRef {
    /// Expectation id in the store.
    pub expectation_id: String,

    /// Pinned version; `None` resolves to the latest.
    #[serde(default)]
    pub version: Option<String>,
}

impl ExpectationRef {
    /// Creates an unversioned reference.
    #[must_use]
    pub fn new(expectation_id: impl Into<String>) -> Self {
        Self {
            expectation_id: expectation_id.into(),
            version: None,
        }
    }

    /// Pins the expectation version.
    #[must_use]
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

impl fmt::Display for ExpectationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}@{v}", self.expectation_id),
            None => f.write_str(&self.expectation_id),
        }
    }
}

/// Absence section of a draft; every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftAbsence {
    /// Expectation the absence is relative to.
    #[serde(default)]
    pub expectation_ref: Option<ExpectationRef>,

    /// Absence window. When missing, the query's own time is the window.
    #[serde(default)]
    pub window: Option<TimeSpec>,

    /// Assertions backing the expectation.
    #[serde(default)]
    pub grounding_pointers: Vec<GroundingPointer>,

    /// Optional scope refinements handed to the backend verbatim.
    #[serde(default)]
    pub scope: BTreeMap<String, Value>,
}

/// A validated absence specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AbsenceSpec {
    /// The expectation as resolved during validation.
    pub expectation: ResolvedExpectation,
    /// Concrete BETWEEN window. An AS_OF instant only survives validation
    /// when the expectation fixes the interval around it.
    pub window: TimeSpec,
    /// Assertions backing the expectation, never empty.
    pub grounding_pointers: Vec<GroundingPointer>,
    /// Scope refinements, handed to backends verbatim.
    pub scope: BTreeMap<String, Value>,
}

impl AbsenceSpec {
    /// Converts back into draft form (used when re-checking decoded IR).
    #[must_use]
    pub fn to_draft(&self) -> DraftAbsence {
        DraftAbsence {
            expectation_ref: Some(self.expectation.to_ref()),
            window: Some(self.window.clone()),
            grounding_pointers: self.grounding_pointers.clone(),
            scope: self.scope.clone(),
        }
    }
}

/// Checks the absence contract (I5).
///
/// Required iff the target is ABSENCES or an absence section is present.
/// `resolve` is called once, and only for a well-formed expectation
/// reference. Returns the assembled spec when every coordinate is present.
pub(crate) fn check_absence<F>(
    target: Option<Target>,
    absence: Option<&DraftAbsence>,
    query_time: Option<&TimeSpec>,
    resolve: F,
    errors: &mut Vec<ValidationError>,
) -> Option<AbsenceSpec>
where
    F: FnOnce(&ExpectationRef) -> Result<ResolvedExpectation, RegistryError>,
{
    let Some(absence) = absence else {
        if target == Some(Target::Absences) {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "absence",
                "ABSENCES target requires an absence specification",
            ));
        }
        return None;
    };

    let before = errors.len();

    let expectation_ref = match &absence.expectation_ref {
        Some(r) if r.expectation_id.trim().is_empty() => {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "absence.expectation_ref",
                "expectation_ref.expectation_id must be non-empty",
            ));
            None
        }
        Some(r) if r.version.as_deref().is_some_and(|v| v.trim().is_empty()) => {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "absence.expectation_ref.version",
                "expectation version, when given, must be non-empty",
            ));
            None
        }
        Some(r) => Some(r),
        None => {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "absence.expectation_ref",
                "absence requires an expectation_ref; absence is relative to an expectation",
            ));
            None
        }
    };

    let expectation = expectation_ref.and_then(|r| match resolve(r) {
        Ok(resolved) => Some(resolved),
        Err(reason) => {
            tracing::warn!(expectation = %r, error = %reason, "expectation resolution failed");
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "absence.expectation_ref",
                format!("unresolved expectation '{r}': {reason}"),
            ));
            None
        }
    });

    let window = check_window(absence, expectation.as_ref(), query_time, errors);

    if let (Some(expectation), Some(window)) = (&expectation, &window) {
        if expectation.schedule.as_ref().is_some_and(|s| !s.overlaps(window)) {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "absence.expectation_ref",
                format!("expectation '{expectation}' is not active during {window}"),
            ));
        }
    }

    if absence.grounding_pointers.is_empty() {
        errors.push(ValidationError::invariant(
            InvariantId::I5,
            "absence.grounding_pointers",
            "absence requires at least one grounding pointer backing the expectation",
        ));
    }
    for (i, p) in absence.grounding_pointers.iter().enumerate() {
        if p.as_str().trim().is_empty() {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                format!("absence.grounding_pointers[{i}]"),
                "grounding pointers must be non-empty",
            ));
        }
    }

    if let Some((key, _)) = absence.scope.iter().find(|(_, v)| !v.is_finite()) {
        errors.push(ValidationError::invariant(
            InvariantId::I5,
            format!("absence.scope.{key}"),
            "absence scope values must be finite",
        ));
    }

    if errors.len() != before {
        return None;
    }

    Some(AbsenceSpec {
        expectation: expectation?,
        window: window?,
        grounding_pointers: absence.grounding_pointers.clone(),
        scope: absence.scope.clone(),
    })
}

/// Settles the window: an explicit or inherited BETWEEN is kept, an AS_OF
/// instant is widened by a resolved expectation that defines its window.
fn check_window(
    absence: &DraftAbsence,
    expectation: Option<&ResolvedExpectation>,
    query_time: Option<&TimeSpec>,
    errors: &mut Vec<ValidationError>,
) -> Option<TimeSpec> {
    let window = match (&absence.window, query_time) {
        (Some(w), _) => {
            if !w.is_well_formed() {
                errors.push(ValidationError::invariant(
                    InvariantId::I5,
                    "absence.window",
                    "absence window start must not be after its end",
                ));
                return None;
            }
            w.clone()
        }
        (None, Some(t)) => t.clone(),
        (None, None) => {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "absence.window",
                "absence requires a window (explicit or the query time)",
            ));
            return None;
        }
    };

    if window.is_between() {
        return Some(window);
    }

    let schedule = expectation
        .filter(|e| e.defines_window())
        .and_then(|e| e.schedule.as_ref());
    let Some(schedule) = schedule else {
        errors.push(ValidationError::invariant(
            InvariantId::I5,
            "absence.window",
            format!(
                "absence window must be BETWEEN unless the expectation defines its own window, got {}",
                window.kind_name()
            ),
        ));
        return None;
    };

    let derived = schedule.absence_window(window.start());
    if derived.is_none() {
        errors.push(ValidationError::invariant(
            InvariantId::I5,
            "absence.window",
            format!(
                "{} expectation defines no window around {}",
                schedule.frequency,
                window.start()
            ),
        ));
    }
    derived
}

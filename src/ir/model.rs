//! Validated IR value types.
//!
//! The epistemic categories are closed enums: adding a target, mode,
//! visibility or policy is a versioned model change that every consumer
//! must handle exhaustively.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::absence::AbsenceSpec;
use crate::conflict::ConflictPolicy;
use crate::frame::ResolvedFrame;
use crate::pattern::{Pattern, Predicate};
use crate::time::TimeSpec;

/// Return field a query must request when visibility is EXISTS.
pub const VISIBILITY_METADATA_FIELD: &str = "visibility_metadata";

/// What kind of object the question asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Target {
    /// Recorded or interpreted claims.
    Claims,
    /// Expected occurrences that did not happen.
    Absences,
    /// Frame definitions.
    Frames,
    /// Grounding trails.
    Traces,
}

/// GIVEN (asserted as recorded) or MEANT (inferred/interpreted).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mode {
    /// As recorded.
    Given,
    /// As interpreted.
    Meant,
}

/// VISIBLE (shown unconditionally) or EXISTS (existence affirmed subject to
/// scope, with explicit visibility metadata).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    /// Only items shown unconditionally.
    Visible,
    /// Every item known to exist, with visibility metadata.
    Exists,
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Claims => "CLAIMS",
            Self::Absences => "ABSENCES",
            Self::Frames => "FRAMES",
            Self::Traces => "TRACES",
        })
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Given => "GIVEN",
            Self::Meant => "MEANT",
        })
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Visible => "VISIBLE",
            Self::Exists => "EXISTS",
        })
    }
}

/// Grounding requirement: claims must be traceable to a bounded depth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TraceSpec {
    /// Whether grounding must be traversed.
    pub enabled: bool,

    /// Hop limit; required and at least 1 when enabled.
    #[serde(default)]
    pub max_depth: Option<u32>,

    /// Predicates each grounding edge must satisfy.
    #[serde(default)]
    pub grounded_by: Vec<Predicate>,
}

impl TraceSpec {
    /// An enabled trace bounded at `max_depth`.
    #[must_use]
    pub fn enabled(max_depth: u32) -> Self {
        Self {
            enabled: true,
            max_depth: Some(max_depth),
            grounded_by: Vec::new(),
        }
    }
}

/// The validated return section.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReturnSpec {
    pub(crate) conflict_policy: ConflictPolicy,
    pub(crate) fields: BTreeSet<String>,
    pub(crate) combined_modes: bool,
}

impl ReturnSpec {
    /// The fully declared conflict policy.
    pub fn conflict_policy(&self) -> &ConflictPolicy {
        &self.conflict_policy
    }

    /// Requested output fields.
    pub fn fields(&self) -> &BTreeSet<String> {
        &self.fields
    }

    /// Returns true if the caller explicitly asked for GIVEN and MEANT
    /// results to be presented together.
    pub const fn combined_modes(&self) -> bool {
        self.combined_modes
    }

    /// Returns true if visibility metadata is requested.
    #[must_use]
    pub fn requests_visibility_metadata(&self) -> bool {
        self.fields.contains(VISIBILITY_METADATA_FIELD)
    }
}

/// A query whose every mandatory coordinate is present and whose frame is
/// resolved.
///
/// There is no public constructor: the only ways to obtain one are
/// [`validate`](crate::ir::validate) and
/// [`from_canonical_json`](crate::ir::from_canonical_json), both of which run
/// the full invariant check. Values are immutable.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedIr {
    pub(crate) target: Target,
    pub(crate) mode: Mode,
    pub(crate) visibility: Visibility,
    pub(crate) frame: ResolvedFrame,
    pub(crate) time: TimeSpec,
    pub(crate) pattern: Pattern,
    pub(crate) absence: Option<AbsenceSpec>,
    pub(crate) trace: Option<TraceSpec>,
    #[serde(rename = "return")]
    pub(crate) returns: ReturnSpec,
}

impl ValidatedIr {
    /// What is being asked about.
    pub const fn target(&self) -> Target {
        self.target
    }

    /// GIVEN or MEANT.
    pub const fn mode(&self) -> Mode {
        self.mode
    }

    /// VISIBLE or EXISTS.
    pub const fn visibility(&self) -> Visibility {
        self.visibility
    }

    /// The concrete frame version.
    pub fn frame(&self) -> &ResolvedFrame {
        &self.frame
    }

    /// Declared time coordinate.
    pub fn time(&self) -> &TimeSpec {
        &self.time
    }

    /// Match pattern; possibly unconstrained.
    pub fn pattern(&self) -> &Pattern {
        &self.pattern
    }

    /// Absence clause, if any.
    pub fn absence(&self) -> Option<&AbsenceSpec> {
        self.absence.as_ref()
    }

    /// Trace request, if any.
    pub fn trace(&self) -> Option<&TraceSpec> {
        self.trace.as_ref()
    }

    /// Validated return section.
    pub fn returns(&self) -> &ReturnSpec {
        &self.returns
    }

    /// Shorthand for `returns().conflict_policy()`.
    pub fn conflict_policy(&self) -> &ConflictPolicy {
        &self.returns.conflict_policy
    }

    /// Returns true if grounding traversal is requested.
    #[must_use]
    pub fn trace_enabled(&self) -> bool {
        self.trace.as_ref().is_some_and(|t| t.enabled)
    }
}

impl fmt::Display for ValidatedIr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} UNDER FRAME {} {} RETURN {}",
            self.target,
            self.mode,
            self.visibility,
            self.frame,
            self.time,
            self.returns.conflict_policy
        )
    }
}

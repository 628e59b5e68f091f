//! Caller-supplied drafts.
//!
//! A draft has the same shape as a validated IR but any field may be
//! missing. Drafts are plain mutable data; nothing about a draft is trusted
//! until it passes validation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::absence::DraftAbsence;
use crate::conflict::{ConflictPolicyKind, SelectionRule};
use crate::error::SchemaError;
use crate::frame::FrameRef;
use crate::ir::model::{Mode, Target, TraceSpec, ValidatedIr, Visibility};
use crate::pattern::Pattern;
use crate::time::TimeSpec;

/// Return section of a draft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftReturn {
    /// Declared conflict policy.
    #[serde(default)]
    pub conflict_policy: Option<ConflictPolicyKind>,

    /// Rule for PICK_ONE; rejected with any other policy.
    #[serde(default)]
    pub selection_rule: Option<SelectionRule>,

    /// Requested output fields.
    #[serde(default)]
    pub fields: BTreeSet<String>,

    /// Explicit request to present GIVEN and MEANT results together.
    #[serde(default)]
    pub combined_modes: bool,
}

/// A structured query request with every field optional.
///
/// # Examples
///
/// ```
/// use eoql::DraftQuery;
///
/// let draft = DraftQuery::from_json(r#"{"target":"CLAIMS","mode":"GIVEN"}"#).unwrap();
/// assert!(draft.frame.is_none());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DraftQuery {
    /// What is being asked about.
    #[serde(default)]
    pub target: Option<Target>,

    /// GIVEN or MEANT.
    #[serde(default)]
    pub mode: Option<Mode>,

    /// VISIBLE or EXISTS.
    #[serde(default)]
    pub visibility: Option<Visibility>,

    /// Interpretation frame.
    #[serde(default)]
    pub frame: Option<FrameRef>,

    /// AS_OF or BETWEEN.
    #[serde(default)]
    pub time: Option<TimeSpec>,

    /// Match text and predicates.
    #[serde(default)]
    pub pattern: Pattern,

    /// Absence clause.
    #[serde(default)]
    pub absence: Option<DraftAbsence>,

    /// Grounding trace request.
    #[serde(default)]
    pub trace: Option<TraceSpec>,

    /// The `return` section.
    #[serde(default, rename = "return")]
    pub returns: DraftReturn,
}

impl DraftQuery {
    /// Parses a draft from its JSON request form.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] for malformed JSON, unknown fields, unknown
    /// enum tags, wrong field types or unparseable instants. Missing fields
    /// are not schema errors; they are reported by the validator.
    pub fn from_json(s: &str) -> Result<Self, SchemaError> {
        Ok(serde_json::from_str(s)?)
    }

    /// Parses a draft from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`DraftQuery::from_json`].
    pub fn from_value(value: serde_json::Value) -> Result<Self, SchemaError> {
        Ok(serde_json::from_value(value)?)
    }
}

impl ValidatedIr {
    /// Converts back into a draft carrying the same coordinates, with the
    /// frame pinned to its resolved version.
    #[must_use]
    pub fn to_draft(&self) -> DraftQuery {
        DraftQuery {
            target: Some(self.target),
            mode: Some(self.mode),
            visibility: Some(self.visibility),
            frame: Some(FrameRef::pinned(
                self.frame.frame_id.clone(),
                self.frame.resolved_version.clone(),
            )),
            time: Some(self.time.clone()),
            pattern: self.pattern.clone(),
            absence: self.absence.as_ref().map(crate::absence::AbsenceSpec::to_draft),
            trace: self.trace.clone(),
            returns: DraftReturn {
                conflict_policy: Some(self.returns.conflict_policy.kind()),
                selection_rule: self.returns.conflict_policy.selection_rule().cloned(),
                fields: self.returns.fields.clone(),
                combined_modes: self.returns.combined_modes,
            },
        }
    }
}

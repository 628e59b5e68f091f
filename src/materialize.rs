//! Explicit default materialization.
//!
//! The validator never invents a frame, a time or a conflict policy. A
//! deployment that wants defaults applies them here, as a separate and
//! auditable step, before the draft reaches the validator. The filled values
//! are then validated exactly as if the caller had supplied them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::conflict::ConflictPolicyKind;
use crate::frame::FrameRef;
use crate::ir::DraftQuery;
use crate::time::TimeSpec;

/// Defaults a deployment is willing to apply on a caller's behalf.
///
/// PICK_ONE is deliberately not representable as a default: it needs a
/// caller-named selection rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MaterializationPolicy {
    /// Frame used when the draft names none.
    #[serde(default)]
    pub frame: Option<FrameRef>,

    /// Time used when the draft names none.
    #[serde(default)]
    pub time: Option<TimeSpec>,

    /// Conflict policy used when the draft names none.
    #[serde(default)]
    pub conflict_policy: Option<ConflictPolicyKind>,
}

/// A field filled by materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializedField {
    /// `frame`
    Frame,
    /// `time`
    Time,
    /// `return.conflict_policy`
    ConflictPolicy,
}

impl fmt::Display for MaterializedField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Frame => "frame",
            Self::Time => "time",
            Self::ConflictPolicy => "return.conflict_policy",
        })
    }
}

/// A draft after materialization plus the record of what was filled.
#[derive(Debug, Clone, PartialEq)]
pub struct Materialized {
    /// The draft with defaults applied.
    pub draft: DraftQuery,
    /// Fields taken from the policy, in fill order.
    pub filled: Vec<MaterializedField>,
}

/// Fills absent fields of `draft` from `policy`.
///
/// Fields the caller supplied are never overwritten. A PICK_ONE default is
/// ignored, since no rule can be inferred for it.
#[must_use]
pub fn materialize(mut draft: DraftQuery, policy: &MaterializationPolicy) -> Materialized {
    let mut filled = Vec::new();

    if draft.frame.is_none() {
        if let Some(frame) = &policy.frame {
            draft.frame = Some(frame.clone());
            filled.push(MaterializedField::Frame);
        }
    }
    if draft.time.is_none() {
        if let Some(time) = &policy.time {
            draft.time = Some(time.clone());
            filled.push(MaterializedField::Time);
        }
    }
    if draft.returns.conflict_policy.is_none() {
        if let Some(kind) = policy
            .conflict_policy
            .filter(|k| *k != ConflictPolicyKind::PickOne)
        {
            draft.returns.conflict_policy = Some(kind);
            filled.push(MaterializedField::ConflictPolicy);
        }
    }

    if !filled.is_empty() {
        tracing::debug!(?filled, "materialized defaults");
    }
    Materialized { draft, filled }
}

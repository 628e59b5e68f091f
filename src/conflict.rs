//! Conflict policies.
//!
//! Conflicts between claims are never hidden. A question declares how
//! mutually incompatible claims must be handed back, and every backend is
//! bound by that declaration:
//! - `EXPOSE_ALL` keeps every claim
//! - `CLUSTER` groups conflicting claims without dropping members
//! - `RANK` scores claims without removing lower-ranked ones
//! - `PICK_ONE` selects, but only by an explicit, caller-named rule

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{InvariantId, ValidationError};
use crate::value::Value;

/// The policy name alone, as it appears in a draft.
///
/// Drafts carry the kind and the selection rule separately so that an
/// incomplete PICK_ONE can be represented and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictPolicyKind {
    /// Every conflicting claim is returned.
    ExposeAll,
    /// Conflicting claims are grouped.
    Cluster,
    /// Conflicting claims are scored.
    Rank,
    /// One claim per conflict set, chosen by a caller rule.
    PickOne,
}

impl fmt::Display for ConflictPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExposeAll => write!(f, "EXPOSE_ALL"),
            Self::Cluster => write!(f, "CLUSTER"),
            Self::Rank => write!(f, "RANK"),
            Self::PickOne => write!(f, "PICK_ONE"),
        }
    }
}

/// The tie-break a PICK_ONE policy must apply.
///
/// `rule` is a human-readable description of the selection, for example
/// `"highest certainty under frame"`. `params` carries optional structured
/// arguments for backends that understand them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionRule {
    /// Description of the selection.
    pub rule: String,
    /// Structured arguments.
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl SelectionRule {
    /// Creates a rule without parameters.
    #[must_use]
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a structured parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for SelectionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.rule)
    }
}

/// A fully declared conflict policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub enum ConflictPolicy {
    /// Return every conflicting claim.
    ExposeAll,
    /// Group conflicting claims, keeping every member.
    Cluster,
    /// Score conflicting claims, removing none.
    Rank,
    /// Keep one claim per conflict set.
    PickOne {
        /// The rule choosing the claim.
        selection_rule: SelectionRule,
    },
}

impl ConflictPolicy {
    /// The policy name without its payload.
    #[must_use]
    pub const fn kind(&self) -> ConflictPolicyKind {
        match self {
            Self::ExposeAll => ConflictPolicyKind::ExposeAll,
            Self::Cluster => ConflictPolicyKind::Cluster,
            Self::Rank => ConflictPolicyKind::Rank,
            Self::PickOne { .. } => ConflictPolicyKind::PickOne,
        }
    }

    /// The declared selection rule, for PICK_ONE.
    #[must_use]
    pub const fn selection_rule(&self) -> Option<&SelectionRule> {
        match self {
            Self::PickOne { selection_rule } => Some(selection_rule),
            _ => None,
        }
    }

    /// Returns true if this policy allows a backend to return fewer claims
    /// than it found. Only PICK_ONE does, and only by its declared rule.
    #[must_use]
    pub const fn permits_selection(&self) -> bool {
        matches!(self, Self::PickOne { .. })
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PickOne { selection_rule } => write!(f, "PICK_ONE({selection_rule})"),
            other => write!(f, "{}", other.kind()),
        }
    }
}

/// Checks the conflict contract (I7) and assembles the declared policy.
///
/// Every other policy is accepted as-is; no implicit rule is inferred for
/// any of them, and a selection rule supplied alongside a policy that
/// cannot use it is rejected rather than ignored.
pub(crate) fn check_conflict_policy(
    kind: Option<ConflictPolicyKind>,
    selection_rule: Option<&SelectionRule>,
    errors: &mut Vec<ValidationError>,
) -> Option<ConflictPolicy> {
    let Some(kind) = kind else {
        errors.push(ValidationError::invariant(
            InvariantId::I7,
            "return.conflict_policy",
            "conflict_policy must be declared (EXPOSE_ALL, CLUSTER, RANK or PICK_ONE)",
        ));
        return None;
    };

    let policy = match kind {
        ConflictPolicyKind::ExposeAll => ConflictPolicy::ExposeAll,
        ConflictPolicyKind::Cluster => ConflictPolicy::Cluster,
        ConflictPolicyKind::Rank => ConflictPolicy::Rank,
        ConflictPolicyKind::PickOne => return check_pick_one(selection_rule, errors),
    };

    if selection_rule.is_some() {
        errors.push(ValidationError::invariant(
            InvariantId::I7,
            "return.selection_rule",
            format!("selection_rule is only meaningful for PICK_ONE, not {kind}"),
        ));
        return None;
    }
    Some(policy)
}

fn check_pick_one(
    selection_rule: Option<&SelectionRule>,
    errors: &mut Vec<ValidationError>,
) -> Option<ConflictPolicy> {
    let Some(rule) = selection_rule else {
        errors.push(ValidationError::invariant(
            InvariantId::I7,
            "return.selection_rule",
            "PICK_ONE requires a selection_rule",
        ));
        return None;
    };
    if rule.rule.trim().is_empty() {
        errors.push(ValidationError::invariant(
            InvariantId::I7,
            "return.selection_rule.rule",
            "selection_rule.rule must be a non-empty description of the tie-break",
        ));
        return None;
    }
    if let Some((key, _)) = rule.params.iter().find(|(_, v)| !v.is_finite()) {
        errors.push(ValidationError::invariant(
            InvariantId::I7,
            format!("return.selection_rule.params.{key}"),
            "selection_rule parameters must be finite",
        ));
        return None;
    }
    Some(ConflictPolicy::PickOne {
        selection_rule: rule.clone(),
    })
}

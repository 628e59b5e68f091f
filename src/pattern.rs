//! Query patterns: free-text matching plus structured predicates.
//!
//! Predicates are the only structured filter vocabulary in the IR. The same
//! shape is reused for trace grounding filters (`trace.grounded_by`).

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{InvariantId, ValidationError};
use crate::value::Value;

/// Dotted attribute path grammar, e.g. `subject.region`.
const FIELD_GRAMMAR: &str = r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$";

static FIELD_RE: OnceLock<Option<Regex>> = OnceLock::new();

fn is_valid_field(field: &str) -> bool {
    FIELD_RE
        .get_or_init(|| Regex::new(FIELD_GRAMMAR).ok())
        .as_ref()
        .is_some_and(|re| re.is_match(field))
}

/// Comparison operator of a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredicateOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// Membership in a list operand.
    In,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// Substring or list membership, backend-defined.
    Contains,
    /// Field is null or missing.
    IsNull,
    /// Field is present and not null.
    IsNotNull,
}

impl PredicateOp {
    /// Returns true for operators that take no operand.
    #[must_use]
    pub const fn is_unary(self) -> bool {
        matches!(self, Self::IsNull | Self::IsNotNull)
    }

    /// Returns true for ordering comparisons.
    #[must_use]
    pub const fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Ge | Self::Lt | Self::Le)
    }
}

impl fmt::Display for PredicateOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::In => "IN",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Contains => "CONTAINS",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        };
        f.write_str(s)
    }
}

/// A single `field op value` filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    /// Dotted field path.
    pub field: String,
    /// Operator.
    pub op: PredicateOp,
    /// Operand; null for unary operators.
    #[serde(default = "null_value")]
    pub value: Value,
}

const fn null_value() -> Value {
    Value::Null
}

impl Predicate {
    /// Creates a binary predicate.
    #[must_use]
    pub fn new(field: impl Into<String>, op: PredicateOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    /// `field = value`
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(field, PredicateOp::Eq, value)
    }

    /// `field IN values`
    #[must_use]
    pub fn is_in(field: impl Into<String>, values: impl Into<Value>) -> Self {
        Self::new(field, PredicateOp::In, values)
    }

    /// `field IS NULL`
    #[must_use]
    pub fn is_null(field: impl Into<String>) -> Self {
        Self::new(field, PredicateOp::IsNull, Value::Null)
    }

    /// Returns the reason this predicate is malformed, if it is.
    #[must_use]
    pub fn problem(&self) -> Option<String> {
        if !is_valid_field(&self.field) {
            return Some(format!("invalid field path '{}'", self.field));
        }
        if !self.value.is_finite() {
            return Some(format!("non-finite value for '{}'", self.field));
        }
        match self.op {
            PredicateOp::In if !self.value.is_list() => {
                Some(format!("IN on '{}' requires a list value", self.field))
            }
            op if op.is_unary() && !self.value.is_null() => {
                Some(format!("{op} on '{}' takes no value", self.field))
            }
            op if !op.is_unary() && self.value.is_null() => {
                Some(format!("{op} on '{}' requires a value", self.field))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.op.is_unary() {
            write!(f, "{} {}", self.field, self.op)
        } else {
            write!(f, "{} {} {}", self.field, self.op, self.value)
        }
    }
}

/// What to match: optional text plus conjunctive predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Pattern {
    /// Free-text match.
    #[serde(default)]
    pub match_text: Option<String>,

    /// Predicates, all of which must hold.
    #[serde(default)]
    pub filters: Vec<Predicate>,
}

impl Pattern {
    /// A text-only pattern.
    #[must_use]
    pub fn text(match_text: impl Into<String>) -> Self {
        Self {
            match_text: Some(match_text.into()),
            filters: Vec::new(),
        }
    }

    /// Adds a predicate.
    #[must_use]
    pub fn with_filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    /// Returns true if the pattern matches everything.
    #[must_use]
    pub fn is_unconstrained(&self) -> bool {
        self.match_text.as_deref().map_or(true, |t| t.trim().is_empty()) && self.filters.is_empty()
    }
}

/// Reports every malformed predicate under `invariant` at `{base}[i]`.
pub(crate) fn check_predicates(
    predicates: &[Predicate],
    invariant: InvariantId,
    base: &str,
    errors: &mut Vec<ValidationError>,
) {
    for (i, p) in predicates.iter().enumerate() {
        if let Some(problem) = p.problem() {
            errors.push(ValidationError::invariant(
                invariant,
                format!("{base}[{i}]"),
                problem,
            ));
        }
    }
}

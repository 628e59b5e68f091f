//! Structural diff of two IRs over their canonical trees.
//!
//! Used for audit review ("what changed between these two questions") and to
//! pinpoint the first divergence when a wire form is not canonical.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

use crate::ir::model::ValidatedIr;
use crate::ir::serialization::ir_tree;

/// One difference between two canonical trees.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DiffEntry {
    /// Present only on the right.
    Added {
        /// Dotted path.
        path: String,
        /// Right-hand value.
        value: serde_json::Value,
    },
    /// Present only on the left.
    Removed {
        /// Dotted path.
        path: String,
        /// Left-hand value.
        value: serde_json::Value,
    },
    /// Present on both sides with different leaves.
    Changed {
        /// Dotted path.
        path: String,
        /// Left-hand value.
        before: serde_json::Value,
        /// Right-hand value.
        after: serde_json::Value,
    },
}

impl DiffEntry {
    /// Dotted path of the differing node.
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Added { path, .. } | Self::Removed { path, .. } | Self::Changed { path, .. } => {
                path
            }
        }
    }
}

impl fmt::Display for DiffEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Added { path, value } => write!(f, "+ {path}: {value}"),
            Self::Removed { path, value } => write!(f, "- {path}: {value}"),
            Self::Changed { path, before, after } => write!(f, "~ {path}: {before} -> {after}"),
        }
    }
}

/// Ordered list of differences; empty when the IRs are identical.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IrDiff {
    entries: Vec<DiffEntry>,
}

impl IrDiff {
    /// Returns true when nothing differs.
    pub fn is_same(&self) -> bool {
        self.entries.is_empty()
    }

    /// Differences in tree order.
    pub fn entries(&self) -> &[DiffEntry] {
        &self.entries
    }

    /// Consumes the diff.
    pub fn into_entries(self) -> Vec<DiffEntry> {
        self.entries
    }

    /// Returns true if any entry is at or under `prefix`.
    #[must_use]
    pub fn touches(&self, prefix: &str) -> bool {
        self.entries.iter().any(|e| {
            let p = e.path();
            p == prefix
                || p.strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('.') || rest.starts_with('['))
        })
    }
}

/// Diffs two validated IRs.
#[must_use]
pub fn diff(a: &ValidatedIr, b: &ValidatedIr) -> IrDiff {
    json_diff(&ir_tree(a), &ir_tree(b))
}

pub(crate) fn json_diff(a: &serde_json::Value, b: &serde_json::Value) -> IrDiff {
    let mut out = IrDiff::default();
    walk("", a, b, &mut out.entries);
    out
}

fn child(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn walk(path: &str, a: &serde_json::Value, b: &serde_json::Value, out: &mut Vec<DiffEntry>) {
    use serde_json::Value as J;

    match (a, b) {
        (J::Object(x), J::Object(y)) => {
            let keys: BTreeSet<&String> = x.keys().chain(y.keys()).collect();
            for key in keys {
                let p = child(path, key);
                match (x.get(key), y.get(key)) {
                    (Some(va), Some(vb)) => walk(&p, va, vb, out),
                    (Some(va), None) => out.push(DiffEntry::Removed {
                        path: p,
                        value: va.clone(),
                    }),
                    (None, Some(vb)) => out.push(DiffEntry::Added {
                        path: p,
                        value: vb.clone(),
                    }),
                    (None, None) => {}
                }
            }
        }
        (J::Array(x), J::Array(y)) => {
            for i in 0..x.len().max(y.len()) {
                let p = format!("{path}[{i}]");
                match (x.get(i), y.get(i)) {
                    (Some(va), Some(vb)) => walk(&p, va, vb, out),
                    (Some(va), None) => out.push(DiffEntry::Removed {
                        path: p,
                        value: va.clone(),
                    }),
                    (None, Some(vb)) => out.push(DiffEntry::Added {
                        path: p,
                        value: vb.clone(),
                    }),
                    (None, None) => {}
                }
            }
        }
        _ if a != b => out.push(DiffEntry::Changed {
            path: path.to_string(),
            before: a.clone(),
            after: b.clone(),
        }),
        _ => {}
    }
}

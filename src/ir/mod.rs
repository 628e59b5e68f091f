//! Intermediate Representation (IR) for EOQL questions.
//!
//! - `draft`: the caller-supplied, possibly incomplete question
//! - `validation`: the only path from a draft to a [`ValidatedIr`]
//! - `serialization`: the canonical wire form used for audit and hand-off
//! - `diff`: structural comparison of two IRs

mod diff;
mod draft;
mod model;
mod serialization;
mod validation;

pub use diff::{diff, DiffEntry, IrDiff};
pub use draft::{DraftQuery, DraftReturn};
pub use model::{
    Mode, ReturnSpec, Target, TraceSpec, ValidatedIr, Visibility, VISIBILITY_METADATA_FIELD,
};
pub use serialization::{from_canonical_json, to_canonical_json, IrDigest, SCHEMA_NAME, SCHEMA_VERSION};
pub use validation::{validate, validate_with_expectations};

pub(crate) use validation::check_all;

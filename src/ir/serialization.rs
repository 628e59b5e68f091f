//! Canonical wire form.
//!
//! Every validated IR has exactly one encoding: a compact JSON envelope
//! `{"ir":{..},"schema":"eoql.ir","schema_version":1}` with object keys in
//! lexicographic order. Decoding is strict. Unknown fields, unknown schema
//! versions, structurally invalid IR and non-canonical input are all
//! rejected; nothing is silently dropped.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::absence::AbsenceSpec;
use crate::conflict::ConflictPolicy;
use crate::error::{RegistryError, SerializationError};
use crate::expectation::ResolvedExpectation;
use crate::frame::ResolvedFrame;
use crate::ir::diff::json_diff;
use crate::ir::draft::{DraftQuery, DraftReturn};
use crate::ir::model::{Mode, Target, TraceSpec, ValidatedIr, Visibility};
use crate::ir::validation::check_all;
use crate::pattern::Pattern;
use crate::time::TimeSpec;

/// Schema name carried by every envelope.
pub const SCHEMA_NAME: &str = "eoql.ir";

/// Current wire schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// blake3 digest (hex) of an IR's canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IrDigest(String);

impl IrDigest {
    /// Hex form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IrDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct EnvelopeOut<'a> {
    schema: &'a str,
    schema_version: u32,
    ir: &'a ValidatedIr,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EnvelopeIn {
    schema: String,
    schema_version: u32,
    ir: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct IrRecord {
    target: Target,
    mode: Mode,
    visibility: Visibility,
    frame: ResolvedFrame,
    time: TimeSpec,
    pattern: Pattern,
    absence: Option<AbsenceSpec>,
    trace: Option<TraceSpec>,
    #[serde(rename = "return")]
    returns: ReturnRecord,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ReturnRecord {
    conflict_policy: ConflictPolicy,
    fields: BTreeSet<String>,
    combined_modes: bool,
}

impl IrRecord {
    fn into_draft(self) -> (DraftQuery, ResolvedFrame, Option<ResolvedExpectation>) {
        let draft = DraftQuery {
            target: Some(self.target),
            mode: Some(self.mode),
            visibility: Some(self.visibility),
            frame: Some(crate::frame::FrameRef::pinned(
                self.frame.frame_id.clone(),
                self.frame.resolved_version.clone(),
            )),
            time: Some(self.time),
            pattern: self.pattern,
            absence: self.absence.as_ref().map(AbsenceSpec::to_draft),
            trace: self.trace,
            returns: DraftReturn {
                conflict_policy: Some(self.returns.conflict_policy.kind()),
                selection_rule: self.returns.conflict_policy.selection_rule().cloned(),
                fields: self.returns.fields,
                combined_modes: self.returns.combined_modes,
            },
        };
        let expectation = self.absence.map(|a| a.expectation);
        (draft, self.frame, expectation)
    }
}

/// The canonical JSON tree of an IR (without the envelope).
///
/// IR values contain only string-keyed maps and finite numbers, so
/// encoding cannot fail.
pub(crate) fn ir_tree(ir: &ValidatedIr) -> serde_json::Value {
    serde_json::to_value(ir).unwrap_or_default()
}

fn envelope_tree(ir: &ValidatedIr) -> serde_json::Value {
    serde_json::to_value(EnvelopeOut {
        schema: SCHEMA_NAME,
        schema_version: SCHEMA_VERSION,
        ir,
    })
    .unwrap_or_default()
}

/// Encodes an IR in canonical wire form.
#[must_use]
pub fn to_canonical_json(ir: &ValidatedIr) -> String {
    envelope_tree(ir).to_string()
}

/// Decodes a canonical wire form back into a validated IR.
///
/// The decoded IR is re-checked against every structural invariant. Its
/// embedded frame and expectation resolutions are trusted as recorded,
/// since resolved versions are permanent.
///
/// # Errors
///
/// - [`SerializationError::Malformed`] for bad JSON, unknown or missing fields
/// - [`SerializationError::UnsupportedSchema`] for a foreign schema or version
/// - [`SerializationError::InvalidIr`] if the decoded IR violates an invariant
/// - [`SerializationError::NotIsomorphic`] if the input is not in canonical form
pub fn from_canonical_json(s: &str) -> Result<ValidatedIr, SerializationError> {
    let input: serde_json::Value = serde_json::from_str(s).map_err(malformed)?;

    let envelope: EnvelopeIn = serde_json::from_value(input.clone()).map_err(malformed)?;
    if envelope.schema != SCHEMA_NAME || envelope.schema_version != SCHEMA_VERSION {
        return Err(SerializationError::UnsupportedSchema {
            found: format!("{}/{}", envelope.schema, envelope.schema_version),
        });
    }

    let record: IrRecord = serde_json::from_value(envelope.ir).map_err(malformed)?;
    let (draft, frame, expectation) = record.into_draft();
    let ir = check_all(
        &draft,
        |_| Ok(frame),
        |_| {
            expectation.ok_or_else(|| RegistryError::Unavailable {
                message: "wire form records no expectation".to_string(),
            })
        },
    )
    .map_err(SerializationError::InvalidIr)?;

    let reencoded = envelope_tree(&ir);
    if let Some(first) = json_diff(&input, &reencoded).into_entries().into_iter().next() {
        return Err(SerializationError::NotIsomorphic {
            detail: first.to_string(),
        });
    }
    Ok(ir)
}

fn malformed(e: serde_json::Error) -> SerializationError {
    SerializationError::Malformed {
        message: e.to_string(),
    }
}

impl ValidatedIr {
    /// blake3 digest of the canonical encoding.
    #[must_use]
    pub fn digest(&self) -> IrDigest {
        IrDigest(blake3::hash(to_canonical_json(self).as_bytes()).to_hex().to_string())
    }
}

//! Append-only audit log of validated IR.
//!
//! One JSON line per record: the IR digest plus the canonical wire form.
//! Replaying a log decodes every record through the strict canonical
//! deserializer and verifies its digest.

use std::io::{BufRead, Write};

use serde::{Deserialize, Serialize};

use crate::error::{EoqlError, EoqlResult, SerializationError};
use crate::ir::{from_canonical_json, to_canonical_json, IrDigest, ValidatedIr};

#[derive(Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct AuditRecord {
    digest: IrDigest,
    wire: String,
}

/// Writes audit records to any writer.
#[derive(Debug)]
pub struct AuditLog<W: Write> {
    writer: W,
    records: u64,
}

impl<W: Write> AuditLog<W> {
    /// Wraps `writer`; nothing is written until [`Self::append`].
    pub fn new(writer: W) -> Self {
        Self { writer, records: 0 }
    }

    /// Appends one record and flushes.
    ///
    /// # Errors
    ///
    /// I/O failures from the underlying writer.
    pub fn append(&mut self, ir: &ValidatedIr) -> EoqlResult<IrDigest> {
        let digest = ir.digest();
        let record = AuditRecord {
            digest: digest.clone(),
            wire: to_canonical_json(ir),
        };
        let line = serde_json::to_string(&record).map_err(|e| SerializationError::Malformed {
            message: e.to_string(),
        })?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        self.records += 1;
        Ok(digest)
    }

    /// Records appended so far.
    pub const fn records(&self) -> u64 {
        self.records
    }

    /// Returns the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Replays an audit log.
///
/// Blank lines are skipped.
///
/// # Errors
///
/// I/O failures, malformed records, and records whose digest does not match
/// their IR.
pub fn read_audit_log<R: BufRead>(reader: R) -> EoqlResult<Vec<ValidatedIr>> {
    let mut out = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AuditRecord =
            serde_json::from_str(&line).map_err(|e| SerializationError::Malformed {
                message: format!("audit line {}: {e}", i + 1),
            })?;
        let ir = from_canonical_json(&record.wire)?;
        if ir.digest() != record.digest {
            return Err(EoqlError::Serialization(SerializationError::NotIsomorphic {
                detail: format!("audit line {}: digest mismatch", i + 1),
            }));
        }
        out.push(ir);
    }
    Ok(out)
}

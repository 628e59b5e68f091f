//! Compiler conformance suite.
//!
//! Non-strengthening is a property of an (IR, plan) pair, so the type system
//! alone cannot enforce it. Every backend compiler should pass [`run`] over a
//! representative corpus before it is trusted. Failures are reported as
//! violations against the plan, mostly tagged I8.

use crate::compiler::{
    required_capabilities, ColumnType, Compiler, Plan, PlanStep, RecordKind, RelationalPlan,
    ABSENCES_COLUMN, GROUNDING_COLUMN,
};
use crate::conflict::ConflictPolicy;
use crate::error::{CompileError, InvariantId, ValidationError, Violations};
use crate::ir::{Target, ValidatedIr, Visibility, VISIBILITY_METADATA_FIELD};
use crate::value::Value;

/// What a conformant compiler did with an IR.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// The compiler produced a plan.
    Compiled(Plan),
    /// The compiler refused the IR.
    Refused(CompileError),
}

/// Compiles `ir` with `compiler` and checks the contract.
///
/// A refusal is conformant only if it names a capability the IR needs and
/// the compiler does not declare. A plan is conformant if its envelope
/// matches the IR, compiling again yields an identical plan, and the
/// compiler did not accept an IR needing a capability it lacks.
///
/// # Errors
///
/// Every contract violation found.
pub fn run(compiler: &dyn Compiler, ir: &ValidatedIr) -> Result<Outcome, Violations> {
    let mut errors = Vec::new();
    let required = required_capabilities(ir);
    let missing: Vec<String> = required
        .iter()
        .filter(|(c, _)| !compiler.capabilities().contains(*c))
        .map(|(c, _)| c.to_string())
        .collect();

    let outcome = match compiler.compile(ir) {
        Err(err) if err.is_refusal() => {
            if let CompileError::UnsupportedCapability { capability, .. } = &err {
                if !missing.contains(capability) {
                    errors.push(plan_error(
                        "refusal",
                        format!("refused '{capability}', which is declared or not needed"),
                    ));
                }
            }
            Outcome::Refused(err)
        }
        Err(other) => {
            errors.push(plan_error("compile", format!("unexpected failure: {other}")));
            Outcome::Refused(other)
        }
        Ok(plan) => {
            if let Some(cap) = missing.first() {
                errors.push(plan_error(
                    "capabilities",
                    format!("compiled an IR needing '{cap}' without declaring it"),
                ));
            }
            if let Err(v) = check_envelope(ir, &plan) {
                errors.extend(v);
            }
            match compiler.compile(ir) {
                Ok(again) if again == plan => {}
                _ => errors.push(plan_error(
                    "determinism",
                    "compiling the same IR twice produced different results",
                )),
            }
            Outcome::Compiled(plan)
        }
    };

    match Violations::new(errors) {
        Some(v) => Err(v),
        None => Ok(outcome),
    }
}

/// Checks that a plan's envelope was taken verbatim from `ir`.
///
/// # Errors
///
/// Every mismatch found.
pub fn check_envelope(ir: &ValidatedIr, plan: &Plan) -> Result<(), Violations> {
    let mut errors = Vec::new();

    let declared = serde_json::to_vec(plan.declared_conflict_policy()).unwrap_or_default();
    let source = serde_json::to_vec(ir.conflict_policy()).unwrap_or_default();
    if declared.is_empty() || declared != source {
        errors.push(ValidationError::invariant(
            InvariantId::I8,
            "plan.declared_conflict_policy",
            format!(
                "plan declares {} but the IR declares {}",
                plan.declared_conflict_policy(),
                ir.conflict_policy()
            ),
        ));
    }
    if plan.frame() != ir.frame() {
        errors.push(ValidationError::invariant(
            InvariantId::I1,
            "plan.frame",
            format!("plan frame {} differs from IR frame {}", plan.frame(), ir.frame()),
        ));
    }
    if plan.time() != ir.time() {
        errors.push(ValidationError::invariant(
            InvariantId::I2,
            "plan.time",
            format!("plan time {} differs from IR time {}", plan.time(), ir.time()),
        ));
    }
    if plan.trace_enabled() != ir.trace_enabled() {
        errors.push(ValidationError::invariant(
            InvariantId::I6,
            "plan.trace_enabled",
            "plan trace flag differs from the IR",
        ));
    }
    if plan.provenance().source_ir_digest != ir.digest() {
        errors.push(plan_error(
            "provenance.source_ir_digest",
            "plan provenance does not point at the source IR",
        ));
    }

    Violations::new(errors).map_or(Ok(()), Err)
}

/// Checks the relational mapping rules for a relational payload.
///
/// # Errors
///
/// Every rule the plan breaks, or a single violation if the payload is not
/// relational.
pub fn check_relational(ir: &ValidatedIr, plan: &Plan) -> Result<(), Violations> {
    let relational = RelationalPlan::from_plan(plan)
        .map_err(|e| Violations::single(plan_error("payload", e.to_string())))?;
    let mut errors = Vec::new();

    check_conflict_shape(ir.conflict_policy(), &relational, &mut errors);

    let mode = relational.output.column("mode");
    let combined = ir.returns().combined_modes();
    let selected = relational.steps.iter().find_map(|s| match s {
        PlanStep::SelectMode { modes } => Some(modes.clone()),
        _ => None,
    });
    let mode_ok = match (mode, selected) {
        (Some(col), Some(modes)) if !combined => {
            modes == vec![ir.mode()] && col.constant == Some(Value::from(ir.mode().to_string()))
        }
        (Some(_), Some(modes)) => modes.len() == 2,
        _ => false,
    };
    if !mode_ok {
        errors.push(ValidationError::invariant(
            InvariantId::I3,
            "plan.payload.output.mode",
            format!("every row must be tagged {} and not unioned with other modes", ir.mode()),
        ));
    }

    if ir.visibility() == Visibility::Exists {
        let ok = relational
            .output
            .column(VISIBILITY_METADATA_FIELD)
            .is_some_and(|c| !c.nullable);
        if !ok {
            errors.push(ValidationError::invariant(
                InvariantId::I4,
                "plan.payload.output.visibility_metadata",
                "EXISTS requires a non-nullable visibility_metadata column",
            ));
        }
    }

    if ir.trace_enabled() {
        let depth = ir.trace().and_then(|t| t.max_depth);
        let ok = relational.steps.iter().any(
            |s| matches!(s, PlanStep::TraverseGrounding { max_depth, .. } if Some(*max_depth) == depth),
        );
        if !ok {
            errors.push(ValidationError::invariant(
                InvariantId::I6,
                "plan.payload.steps",
                "enabled trace requires a bounded grounding traversal step",
            ));
        }
    }

    if ir.trace_enabled() && matches!(ir.target(), Target::Claims | Target::Frames) {
        let ok = has_column(&relational, GROUNDING_COLUMN, ColumnType::GroundingTrace);
        if !ok {
            errors.push(ValidationError::invariant(
                InvariantId::I6,
                "plan.payload.output.grounding",
                format!(
                    "traced {} rows require a non-nullable grounding column",
                    ir.target()
                ),
            ));
        }
    }

    check_absence_shape(ir, &relational, &mut errors);

    Violations::new(errors).map_or(Ok(()), Err)
}

fn has_column(plan: &RelationalPlan, name: &str, column_type: ColumnType) -> bool {
    plan.output
        .column(name)
        .is_some_and(|c| c.column_type == column_type && !c.nullable)
}

fn check_absence_shape(
    ir: &ValidatedIr,
    plan: &RelationalPlan,
    errors: &mut Vec<ValidationError>,
) {
    let derived: Vec<&PlanStep> = plan
        .steps
        .iter()
        .filter(|s| matches!(s, PlanStep::DeriveAbsences { .. }))
        .collect();

    let Some(absence) = ir.absence() else {
        if !derived.is_empty() {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "plan.payload.steps",
                "plan derives absences the IR never asked for",
            ));
        }
        return;
    };

    let faithful = match derived.as_slice() {
        [PlanStep::DeriveAbsences {
            expectation,
            window,
            grounding_pointers,
            scope,
        }] => {
            *expectation == absence.expectation
                && *window == absence.window
                && *grounding_pointers == absence.grounding_pointers
                && *scope == absence.scope
        }
        _ => false,
    };
    if !faithful {
        errors.push(ValidationError::invariant(
            InvariantId::I5,
            "plan.payload.steps",
            "exactly one absence derivation must carry the IR absence verbatim",
        ));
    }

    if ir.target() == Target::Absences {
        if plan.output.record != RecordKind::Absence {
            errors.push(ValidationError::invariant(
                InvariantId::I5,
                "plan.payload.output.record",
                "ABSENCES must derive structured absence records",
            ));
        }
    } else if !has_column(plan, ABSENCES_COLUMN, ColumnType::AbsenceRecords) {
        errors.push(ValidationError::invariant(
            InvariantId::I5,
            "plan.payload.output.absences",
            format!(
                "an absence sub-query on {} requires a non-nullable absences column",
                ir.target()
            ),
        ));
    }
}

fn check_conflict_shape(
    policy: &ConflictPolicy,
    plan: &RelationalPlan,
    errors: &mut Vec<ValidationError>,
) {
    let merging: Vec<&PlanStep> = plan.merging_steps().collect();
    let count = |pred: fn(&PlanStep) -> bool| plan.steps.iter().filter(|s| pred(s)).count();

    let problem = match policy {
        ConflictPolicy::ExposeAll => (!merging.is_empty()
            || count(|s| matches!(s, PlanStep::PreserveAll)) != 1)
            .then_some("EXPOSE_ALL must keep one row per claim with no merging step"),
        ConflictPolicy::Cluster => (!merging.is_empty()
            || count(|s| matches!(s, PlanStep::ClusterConflicts { .. })) != 1)
            .then_some("CLUSTER must group conflicts without discarding members"),
        ConflictPolicy::Rank => (!merging.is_empty()
            || count(|s| matches!(s, PlanStep::RankConflicts { .. })) != 1)
            .then_some("RANK must score conflicts without removing any"),
        ConflictPolicy::PickOne { selection_rule } => {
            let ok = matches!(
                merging.as_slice(),
                [PlanStep::SelectByRule { rule, .. }] if rule == selection_rule
            );
            (!ok).then_some("PICK_ONE must apply exactly the declared rule as one explicit step")
        }
    };

    if let Some(message) = problem {
        errors.push(plan_error("payload.steps", message));
    }
}

fn plan_error(field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::invariant(InvariantId::I8, format!("plan.{field}"), message)
}

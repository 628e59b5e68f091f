//! The validator.
//!
//! `validate` is a deterministic function from a draft to either a
//! [`ValidatedIr`] or the complete list of violations. Checks run in
//! invariant order (I0 through I7) and never short-circuit. The validator
//! never fills a missing field; defaults are only ever applied by the
//! explicit materialization pass before validation.
//!
//! External inputs are the frame registry and, optionally, an expectation
//! registry. A frame registry failure (not found, timeout, unavailable) is
//! reported as an unresolved-frame violation like any other; an expectation
//! that cannot be resolved is an I5 violation. Without an expectation
//! registry, expectation references are carried unresolved and never widen
//! an absence window.

use crate::absence::check_absence;
use crate::conflict::check_conflict_policy;
use crate::absence::ExpectationRef;
use crate::error::{InvariantId, RegistryError, ValidationError, Violations};
use crate::expectation::ResolvedExpectation;
use crate::frame::{FrameRef, ResolvedFrame};
use crate::ir::draft::DraftQuery;
use crate::ir::model::{ReturnSpec, Target, ValidatedIr, Visibility, VISIBILITY_METADATA_FIELD};
use crate::pattern::{check_predicates, Predicate};
use crate::registry::{ExpectationRegistry, FrameRegistry};
use crate::time::TimeSpec;

/// Validates a draft against the frame registry.
///
/// # Errors
///
/// Returns every violation found, in invariant order.
///
/// # Examples
///
/// ```
/// use eoql::{validate, DraftQuery, InMemoryFrameRegistry, InvariantId};
///
/// let registry = InMemoryFrameRegistry::new();
/// let violations = validate(&DraftQuery::default(), &registry).unwrap_err();
/// assert!(violations.has_at(InvariantId::I2, "time"));
/// ```
pub fn validate(
    draft: &DraftQuery,
    registry: &dyn FrameRegistry,
) -> Result<ValidatedIr, Violations> {
    run(draft, registry, None)
}

/// Validates a draft, resolving its absence expectation through
/// `expectations`.
///
/// A resolved expectation pins its version in the IR, and one whose rule
/// fixes a window (daily, weekly, ...) turns an AS_OF absence window into
/// the concrete interval around that instant.
///
/// # Errors
///
/// As [`validate`], plus an I5 violation at `absence.expectation_ref` for
/// an expectation the registry cannot resolve or that is inactive over the
/// window.
pub fn validate_with_expectations(
    draft: &DraftQuery,
    registry: &dyn FrameRegistry,
    expectations: &dyn ExpectationRegistry,
) -> Result<ValidatedIr, Violations> {
    run(draft, registry, Some(expectations))
}

fn run(
    draft: &DraftQuery,
    registry: &dyn FrameRegistry,
    expectations: Option<&dyn ExpectationRegistry>,
) -> Result<ValidatedIr, Violations> {
    tracing::debug!(target_kind = ?draft.target, "validating draft");

    let result = check_all(
        draft,
        |frame| {
            registry
                .resolve(&frame.frame_id, frame.version.as_deref())
                .map(|def| def.resolved_ref())
        },
        |reference: &ExpectationRef| match expectations {
            Some(store) => store
                .resolve(&reference.expectation_id, reference.version.as_deref())
                .map(|def| def.resolved()),
            None => Ok(ResolvedExpectation::unresolved(reference)),
        },
    );

    match &result {
        Ok(ir) => tracing::debug!(frame = %ir.frame(), "draft validated"),
        Err(violations) => tracing::debug!(violations = violations.len(), "draft rejected"),
    }
    result
}

/// Runs every invariant check, resolving the frame through `resolve_frame`
/// and the absence expectation through `resolve_expectation`.
///
/// Each resolver is only called when its reference is well-formed.
pub(crate) fn check_all<F, E>(
    draft: &DraftQuery,
    resolve_frame: F,
    resolve_expectation: E,
) -> Result<ValidatedIr, Violations>
where
    F: FnOnce(&FrameRef) -> Result<ResolvedFrame, RegistryError>,
    E: FnOnce(&ExpectationRef) -> Result<ResolvedExpectation, RegistryError>,
{
    let mut errors = Vec::new();

    // I0
    let target = require(draft.target, InvariantId::I0, "target", &mut errors);
    check_predicates(&draft.pattern.filters, InvariantId::I0, "pattern.filters", &mut errors);
    check_return_fields(draft, &mut errors);

    // I1
    let frame = check_frame(draft.frame.as_ref(), resolve_frame, &mut errors);

    // I2
    let time = check_time(draft.time.as_ref(), &mut errors);

    // I3
    let mode = require(draft.mode, InvariantId::I3, "mode", &mut errors);
    let visibility = require(draft.visibility, InvariantId::I3, "visibility", &mut errors);

    // I4
    if visibility == Some(Visibility::Exists)
        && !draft.returns.fields.contains(VISIBILITY_METADATA_FIELD)
    {
        errors.push(ValidationError::invariant(
            InvariantId::I4,
            "return.fields",
            format!("EXISTS visibility requires '{VISIBILITY_METADATA_FIELD}' in return fields"),
        ));
    }

    // I5
    let absence = check_absence(
        target,
        draft.absence.as_ref(),
        draft.time.as_ref(),
        resolve_expectation,
        &mut errors,
    );

    // I6
    check_trace(draft, target, &mut errors);

    // I7
    let conflict_policy = check_conflict_policy(
        draft.returns.conflict_policy,
        draft.returns.selection_rule.as_ref(),
        &mut errors,
    );

    if let Some(violations) = Violations::new(errors) {
        return Err(violations);
    }

    let (Some(target), Some(mode), Some(visibility), Some(frame), Some(time), Some(conflict_policy)) =
        (target, mode, visibility, frame, time, conflict_policy)
    else {
        return Err(Violations::single(ValidationError::invariant(
            InvariantId::I0,
            "",
            "draft is incomplete",
        )));
    };

    Ok(ValidatedIr {
        target,
        mode,
        visibility,
        frame,
        time,
        pattern: draft.pattern.clone(),
        absence,
        trace: draft.trace.clone(),
        returns: ReturnSpec {
            conflict_policy,
            fields: draft.returns.fields.clone(),
            combined_modes: draft.returns.combined_modes,
        },
    })
}

fn require<T: Copy>(
    value: Option<T>,
    invariant: InvariantId,
    field_path: &str,
    errors: &mut Vec<ValidationError>,
) -> Option<T> {
    if value.is_none() {
        errors.push(ValidationError::invariant(
            invariant,
            field_path,
            format!("{field_path} must be declared explicitly"),
        ));
    }
    value
}

fn check_return_fields(draft: &DraftQuery, errors: &mut Vec<ValidationError>) {
    for name in &draft.returns.fields {
        if Predicate::eq(name.as_str(), true).problem().is_some() {
            errors.push(ValidationError::invariant(
                InvariantId::I0,
                "return.fields",
                format!("invalid return field name '{name}'"),
            ));
        }
    }
}

fn check_frame<F>(
    frame: Option<&FrameRef>,
    resolve: F,
    errors: &mut Vec<ValidationError>,
) -> Option<ResolvedFrame>
where
    F: FnOnce(&FrameRef) -> Result<ResolvedFrame, RegistryError>,
{
    let Some(frame) = frame else {
        errors.push(ValidationError::invariant(
            InvariantId::I1,
            "frame",
            "frame must be declared; selecting a frame is a substantive claim",
        ));
        return None;
    };

    if frame.frame_id.trim().is_empty() {
        errors.push(ValidationError::invariant(
            InvariantId::I1,
            "frame.frame_id",
            "frame_id must be non-empty",
        ));
        return None;
    }
    if frame.version.as_deref().is_some_and(|v| v.trim().is_empty()) {
        errors.push(ValidationError::invariant(
            InvariantId::I1,
            "frame.version",
            "frame version, when given, must be non-empty",
        ));
        return None;
    }

    match resolve(frame) {
        Ok(resolved) => Some(resolved),
        Err(reason) => {
            tracing::warn!(frame = %frame, error = %reason, "frame resolution failed");
            errors.push(ValidationError::UnresolvedFrame {
                frame_id: frame.frame_id.clone(),
                version: frame.version.clone(),
                reason,
            });
            None
        }
    }
}

fn check_time(time: Option<&TimeSpec>, errors: &mut Vec<ValidationError>) -> Option<TimeSpec> {
    let Some(time) = time else {
        errors.push(ValidationError::invariant(
            InvariantId::I2,
            "time",
            "time must be declared (AS_OF or BETWEEN); no implicit 'now'",
        ));
        return None;
    };
    if !time.is_well_formed() {
        errors.push(ValidationError::invariant(
            InvariantId::I2,
            "time",
            format!(
                "BETWEEN start ({}) must not be after end ({})",
                time.start(),
                time.end()
            ),
        ));
        return None;
    }
    Some(time.clone())
}

fn check_trace(draft: &DraftQuery, target: Option<Target>, errors: &mut Vec<ValidationError>) {
    let enabled = draft.trace.as_ref().is_some_and(|t| t.enabled);

    if target == Some(Target::Traces) && !enabled {
        errors.push(ValidationError::invariant(
            InvariantId::I6,
            "trace.enabled",
            "TRACES target requires an enabled trace",
        ));
    }

    let Some(trace) = &draft.trace else {
        return;
    };

    if trace.enabled {
        if trace.max_depth.map_or(true, |d| d < 1) {
            errors.push(ValidationError::invariant(
                InvariantId::I6,
                "trace.max_depth",
                "enabled trace requires max_depth >= 1",
            ));
        }
    } else if !trace.grounded_by.is_empty() {
        errors.push(ValidationError::invariant(
            InvariantId::I6,
            "trace.grounded_by",
            "grounded_by predicates require an enabled trace",
        ));
    }

    check_predicates(&trace.grounded_by, InvariantId::I6, "trace.grounded_by", errors);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::absence::{DraftAbsence, GroundingPointer};
    use crate::conflict::{ConflictPolicy, ConflictPolicyKind, SelectionRule};
    use crate::expectation::{ExpectationDefinition, ExpectationFrequency, ExpectationRule};
    use crate::frame::FrameDefinition;
    use crate::ir::model::{Mode, TraceSpec};
    use crate::pattern::PredicateOp;
    use crate::registry::{InMemoryExpectationRegistry, InMemoryFrameRegistry};
    use chrono::{DateTime, TimeZone, Utc};

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap()
    }

    fn registry() -> InMemoryFrameRegistry {
        let registry = InMemoryFrameRegistry::new();
        registry
            .register(FrameDefinition::new("F_official", "2.0", "Official"))
            .unwrap();
        registry
    }

    fn valid_draft() -> DraftQuery {
        let mut draft = DraftQuery {
            target: Some(Target::Claims),
            mode: Some(Mode::Given),
            visibility: Some(Visibility::Visible),
            frame: Some(FrameRef::pinned("F_official", "2.0")),
            time: Some(TimeSpec::as_of(t(1))),
            ..DraftQuery::default()
        };
        draft.returns.conflict_policy = Some(ConflictPolicyKind::ExposeAll);
        draft
    }

    fn violations(draft: &DraftQuery) -> Violations {
        validate(draft, &registry()).unwrap_err()
    }

    #[test]
    fn test_valid_draft() {
        let ir = validate(&valid_draft(), &registry()).unwrap();
        assert_eq!(ir.target(), Target::Claims);
        assert_eq!(ir.frame().resolved_version, "2.0");
        assert_eq!(ir.conflict_policy(), &ConflictPolicy::ExposeAll);
        assert!(!ir.trace_enabled());
    }

    #[test]
    fn test_empty_draft_reports_everything_in_order() {
        let v = violations(&DraftQuery::default());
        let ids: Vec<_> = v.iter().map(ValidationError::invariant_id).collect();
        assert_eq!(
            ids,
            vec![
                InvariantId::I0,
                InvariantId::I1,
                InvariantId::I2,
                InvariantId::I3,
                InvariantId::I3,
                InvariantId::I7,
            ]
        );
    }

    #[test]
    fn test_missing_time_is_i2() {
        let mut draft = valid_draft();
        draft.time = None;
        let v = violations(&draft);
        assert_eq!(v.len(), 1);
        assert!(v.has_at(InvariantId::I2, "time"));
    }

    #[test]
    fn test_inverted_time_is_i2() {
        let mut draft = valid_draft();
        draft.time = Some(TimeSpec::Between { start: t(9), end: t(2) });
        assert!(violations(&draft).has_at(InvariantId::I2, "time"));
    }

    #[test]
    fn test_missing_frame_is_i1() {
        let mut draft = valid_draft();
        draft.frame = None;
        let v = violations(&draft);
        assert!(v.has_at(InvariantId::I1, "frame"));
        assert!(!v[0].is_unresolved_frame());
    }

    #[test]
    fn test_blank_frame_id_is_i1() {
        let mut draft = valid_draft();
        draft.frame = Some(FrameRef::new(" "));
        assert!(violations(&draft).has_at(InvariantId::I1, "frame.frame_id"));
    }

    #[test]
    fn test_unknown_frame_is_unresolved() {
        let mut draft = valid_draft();
        draft.frame = Some(FrameRef::new("risk-v3"));
        let v = violations(&draft);
        match &v[0] {
            ValidationError::UnresolvedFrame { frame_id, reason, .. } => {
                assert_eq!(frame_id, "risk-v3");
                assert!(matches!(reason, RegistryError::NotFound { .. }));
            }
            other => panic!("unexpected violation: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_frame_still_reports_other_violations() {
        let mut draft = valid_draft();
        draft.frame = Some(FrameRef::new("risk-v3"));
        draft.mode = None;
        let v = violations(&draft);
        assert_eq!(v.len(), 2);
        assert!(v.has_at(InvariantId::I3, "mode"));
    }

    #[test]
    fn test_missing_visibility_is_i3() {
        let mut draft = valid_draft();
        draft.visibility = None;
        assert!(violations(&draft).has_at(InvariantId::I3, "visibility"));
    }

    #[test]
    fn test_exists_without_metadata_is_i4() {
        let mut draft = valid_draft();
        draft.visibility = Some(Visibility::Exists);
        assert!(violations(&draft).has_at(InvariantId::I4, "return.fields"));

        draft.returns.fields.insert(VISIBILITY_METADATA_FIELD.to_string());
        assert!(validate(&draft, &registry()).is_ok());
    }

    #[test]
    fn test_absences_without_expectation_is_i5() {
        let mut draft = valid_draft();
        draft.target = Some(Target::Absences);
        draft.time = Some(TimeSpec::between(t(1), t(2)).unwrap());
        draft.absence = Some(DraftAbsence {
            grounding_pointers: vec![GroundingPointer::from("assertion-7")],
            ..DraftAbsence::default()
        });
        assert!(violations(&draft).has_at(InvariantId::I5, "absence.expectation_ref"));

        draft.absence.as_mut().unwrap().expectation_ref = Some(ExpectationRef::new("exp-42"));
        let ir = validate(&draft, &registry()).unwrap();
        assert_eq!(ir.absence().unwrap().window, TimeSpec::between(t(1), t(2)).unwrap());
    }

    fn absence_draft(time: TimeSpec) -> DraftQuery {
        let mut draft = valid_draft();
        draft.target = Some(Target::Absences);
        draft.time = Some(time);
        draft.absence = Some(DraftAbsence {
            expectation_ref: Some(ExpectationRef::new("exp-42")),
            grounding_pointers: vec![GroundingPointer::from("assertion-7")],
            ..DraftAbsence::default()
        });
        draft
    }

    fn expectations() -> InMemoryExpectationRegistry {
        let store = InMemoryExpectationRegistry::new();
        store
            .register(
                ExpectationDefinition::new("exp-42", "1", "Weekly filing")
                    .with_rule(ExpectationRule::new(ExpectationFrequency::Weekly)),
            )
            .unwrap();
        store
    }

    #[test]
    fn test_resolved_expectation_widens_as_of_window() {
        // 2025-03-05 is a Wednesday.
        let draft = absence_draft(TimeSpec::as_of(t(5)));
        assert!(violations(&draft).has_at(InvariantId::I5, "absence.window"));

        let ir = validate_with_expectations(&draft, &registry(), &expectations()).unwrap();
        let absence = ir.absence().unwrap();
        assert_eq!(absence.window, TimeSpec::between(t(3), t(10)).unwrap());
        assert_eq!(absence.expectation.version.as_deref(), Some("1"));
    }

    #[test]
    fn test_unknown_expectation_is_i5() {
        let mut draft = absence_draft(TimeSpec::between(t(1), t(2)).unwrap());
        draft.absence.as_mut().unwrap().expectation_ref = Some(ExpectationRef::new("exp-99"));
        let v = validate_with_expectations(&draft, &registry(), &expectations()).unwrap_err();
        assert!(v.has_at(InvariantId::I5, "absence.expectation_ref"));
        assert!(v[0].message().contains("exp-99"));
    }

    #[test]
    fn test_enabled_trace_without_depth_is_i6() {
        let mut draft = valid_draft();
        draft.trace = Some(TraceSpec {
            enabled: true,
            max_depth: None,
            grounded_by: Vec::new(),
        });
        assert!(violations(&draft).has_at(InvariantId::I6, "trace.max_depth"));

        draft.trace.as_mut().unwrap().max_depth = Some(0);
        assert!(violations(&draft).has_at(InvariantId::I6, "trace.max_depth"));

        draft.trace.as_mut().unwrap().max_depth = Some(3);
        assert!(validate(&draft, &registry()).unwrap().trace_enabled());
    }

    #[test]
    fn test_malformed_grounded_by_is_i6() {
        let mut draft = valid_draft();
        let mut trace = TraceSpec::enabled(2);
        trace.grounded_by.push(Predicate::new("source", PredicateOp::In, "x"));
        draft.trace = Some(trace);
        assert!(violations(&draft).has_at(InvariantId::I6, "trace.grounded_by[0]"));
    }

    #[test]
    fn test_grounded_by_on_disabled_trace_is_i6() {
        let mut draft = valid_draft();
        draft.trace = Some(TraceSpec {
            enabled: false,
            max_depth: None,
            grounded_by: vec![Predicate::eq("source.kind", "sensor")],
        });
        assert!(violations(&draft).has_at(InvariantId::I6, "trace.grounded_by"));
    }

    #[test]
    fn test_traces_target_requires_enabled_trace() {
        let mut draft = valid_draft();
        draft.target = Some(Target::Traces);
        assert!(violations(&draft).has_at(InvariantId::I6, "trace.enabled"));
    }

    #[test]
    fn test_pick_one_without_rule_is_i7() {
        let mut draft = valid_draft();
        draft.returns.conflict_policy = Some(ConflictPolicyKind::PickOne);
        assert!(violations(&draft).has_at(InvariantId::I7, "return.selection_rule"));

        draft.returns.selection_rule = Some(SelectionRule::new("highest certainty under frame"));
        let ir = validate(&draft, &registry()).unwrap();
        assert!(ir.conflict_policy().permits_selection());
    }

    #[test]
    fn test_missing_policy_is_i7_not_defaulted() {
        let mut draft = valid_draft();
        draft.returns.conflict_policy = None;
        assert!(violations(&draft).has_at(InvariantId::I7, "return.conflict_policy"));
    }

    #[test]
    fn test_bad_pattern_filter_is_i0() {
        let mut draft = valid_draft();
        draft.pattern.filters.push(Predicate::eq("", 1_i64));
        assert!(violations(&draft).has_at(InvariantId::I0, "pattern.filters[0]"));
    }

    #[test]
    fn test_bad_return_field_is_i0() {
        let mut draft = valid_draft();
        draft.returns.fields.insert("not a field".to_string());
        assert!(violations(&draft).has_at(InvariantId::I0, "return.fields"));
    }

    #[test]
    fn test_validation_is_deterministic() {
        let draft = DraftQuery::default();
        assert_eq!(violations(&draft), violations(&draft));
        let ok = valid_draft();
        assert_eq!(
            validate(&ok, &registry()).unwrap(),
            validate(&ok, &registry()).unwrap()
        );
    }

    #[test]
    fn test_resolver_not_called_for_malformed_frame() {
        let mut draft = valid_draft();
        draft.frame = Some(FrameRef::new(""));
        let result = check_all(
            &draft,
            |_| panic!("resolver must not be called"),
            |r| Ok(ResolvedExpectation::unresolved(r)),
        );
        assert!(result.is_err());
    }
}

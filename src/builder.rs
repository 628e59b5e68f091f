//! Fluent construction of draft queries.
//!
//! The builder only assembles a [`DraftQuery`]; it supplies no defaults.
//! Anything left unset stays unset and is reported by the validator.

use chrono::{DateTime, Utc};

use crate::absence::{DraftAbsence, ExpectationRef, GroundingPointer};
use crate::conflict::{ConflictPolicyKind, SelectionRule};
use crate::error::Violations;
use crate::frame::FrameRef;
use crate::ir::{
    validate, validate_with_expectations, DraftQuery, Mode, Target, TraceSpec, ValidatedIr, Visibility,
    VISIBILITY_METADATA_FIELD,
};
use crate::pattern::{Predicate, PredicateOp};
use crate::registry::{ExpectationRegistry, FrameRegistry};
use crate::time::TimeSpec;
use crate::value::Value;

/// Builder for draft queries.
///
/// # Example
/// ```rust,ignore
/// let ir = QueryBuilder::new()
///     .absences()
///     .given()
///     .visible()
///     .under_frame("F_official", Some("2.0"))
///     .between(jan_1, jan_31)
///     .expecting(ExpectationRef::new("exp-42"))
///     .grounding_pointer("assertion-7")
///     .conflict_policy(ConflictPolicyKind::ExposeAll)
///     .validate(&registry)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    draft: DraftQuery,
}

impl QueryBuilder {
    /// An empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Continues building from an existing draft.
    #[must_use]
    pub fn from_draft(draft: DraftQuery) -> Self {
        Self { draft }
    }

    /// Sets the target.
    #[must_use]
    pub fn target(mut self, target: Target) -> Self {
        self.draft.target = Some(target);
        self
    }

    /// CLAIMS target.
    #[must_use]
    pub fn claims(self) -> Self {
        self.target(Target::Claims)
    }

    /// ABSENCES target.
    #[must_use]
    pub fn absences(self) -> Self {
        self.target(Target::Absences)
    }

    /// FRAMES target.
    #[must_use]
    pub fn frames(self) -> Self {
        self.target(Target::Frames)
    }

    /// TRACES target.
    #[must_use]
    pub fn traces(self) -> Self {
        self.target(Target::Traces)
    }

    /// GIVEN mode.
    #[must_use]
    pub fn given(mut self) -> Self {
        self.draft.mode = Some(Mode::Given);
        self
    }

    /// MEANT mode.
    #[must_use]
    pub fn meant(mut self) -> Self {
        self.draft.mode = Some(Mode::Meant);
        self
    }

    /// VISIBLE visibility.
    #[must_use]
    pub fn visible(mut self) -> Self {
        self.draft.visibility = Some(Visibility::Visible);
        self
    }

    /// EXISTS visibility; also requests visibility metadata.
    #[must_use]
    pub fn exists(mut self) -> Self {
        self.draft.visibility = Some(Visibility::Exists);
        self.field(VISIBILITY_METADATA_FIELD)
    }

    /// Frame reference; `None` asks for the latest version.
    #[must_use]
    pub fn under_frame(mut self, frame_id: impl Into<String>, version: Option<&str>) -> Self {
        self.draft.frame = Some(FrameRef {
            frame_id: frame_id.into(),
            version: version.map(str::to_string),
        });
        self
    }

    /// AS_OF time.
    #[must_use]
    pub fn as_of(mut self, at: DateTime<Utc>) -> Self {
        self.draft.time = Some(TimeSpec::as_of(at));
        self
    }

    /// BETWEEN time. An inverted interval is kept as given and rejected
    /// at validation.
    #[must_use]
    pub fn between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.draft.time = Some(TimeSpec::Between { start, end });
        self
    }

    /// Free-text match.
    #[must_use]
    pub fn matching(mut self, text: impl Into<String>) -> Self {
        self.draft.pattern.match_text = Some(text.into());
        self
    }

    /// Adds a pattern predicate.
    #[must_use]
    pub fn filter(mut self, field: impl Into<String>, op: PredicateOp, value: impl Into<Value>) -> Self {
        self.draft.pattern.filters.push(Predicate::new(field, op, value));
        self
    }

    /// Enables grounding traversal to `max_depth`.
    #[must_use]
    pub fn with_trace(mut self, max_depth: u32) -> Self {
        let trace = self.draft.trace.get_or_insert_with(TraceSpec::default);
        trace.enabled = true;
        trace.max_depth = Some(max_depth);
        self
    }

    /// Restricts grounding traversal; needs [`Self::with_trace`].
    #[must_use]
    pub fn grounded_by(mut self, predicate: Predicate) -> Self {
        self.draft
            .trace
            .get_or_insert_with(TraceSpec::default)
            .grounded_by
            .push(predicate);
        self
    }

    /// Expectation the absence is relative to.
    #[must_use]
    pub fn expecting(mut self, expectation: ExpectationRef) -> Self {
        self.absence_mut().expectation_ref = Some(expectation);
        self
    }

    /// Explicit absence window, overriding the query time.
    #[must_use]
    pub fn absence_window(mut self, window: TimeSpec) -> Self {
        self.absence_mut().window = Some(window);
        self
    }

    /// Adds a grounding pointer backing the expectation.
    #[must_use]
    pub fn grounding_pointer(mut self, pointer: impl Into<String>) -> Self {
        self.absence_mut()
            .grounding_pointers
            .push(GroundingPointer::new(pointer));
        self
    }

    /// Declares the conflict policy.
    #[must_use]
    pub fn conflict_policy(mut self, kind: ConflictPolicyKind) -> Self {
        self.draft.returns.conflict_policy = Some(kind);
        self
    }

    /// Selection rule for PICK_ONE.
    #[must_use]
    pub fn selection_rule(mut self, rule: SelectionRule) -> Self {
        self.draft.returns.selection_rule = Some(rule);
        self
    }

    /// PICK_ONE with the given tie-break description.
    #[must_use]
    pub fn pick_one(self, rule: impl Into<String>) -> Self {
        self.conflict_policy(ConflictPolicyKind::PickOne)
            .selection_rule(SelectionRule::new(rule))
    }

    /// Requests a return field.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>) -> Self {
        self.draft.returns.fields.insert(name.into());
        self
    }

    /// Explicitly asks for GIVEN and MEANT results together.
    #[must_use]
    pub fn combined_modes(mut self) -> Self {
        self.draft.returns.combined_modes = true;
        self
    }

    /// Adds an absence scope refinement, handed to backends verbatim.
    #[must_use]
    pub fn absence_scope(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.absence_mut().scope.insert(key.into(), value.into());
        self
    }

    fn absence_mut(&mut self) -> &mut DraftAbsence {
        self.draft.absence.get_or_insert_with(DraftAbsence::default)
    }

    /// The assembled draft.
    #[must_use]
    pub fn build(self) -> DraftQuery {
        self.draft
    }

    /// Builds and validates in one step.
    ///
    /// # Errors
    ///
    /// Every violation the validator finds.
    pub fn validate(self, registry: &dyn FrameRegistry) -> Result<ValidatedIr, Violations> {
        validate(&self.draft, registry)
    }

    /// Builds and validates, resolving the absence expectation.
    ///
    /// # Errors
    ///
    /// Every violation the validator finds.
    pub fn validate_with_expectations(
        self,
        registry: &dyn FrameRegistry,
        expectations: &dyn ExpectationRegistry,
    ) -> Result<ValidatedIr, Violations> {
        validate_with_expectations(&self.draft, registry, expectations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InvariantId;
    use crate::expectation::{ExpectationDefinition, ExpectationFrequency, ExpectationRule};
    use crate::frame::FrameDefinition;
    use crate::registry::{InMemoryExpectationRegistry, InMemoryFrameRegistry};
    use chrono::TimeZone;

    fn registry() -> InMemoryFrameRegistry {
        let r = InMemoryFrameRegistry::new();
        r.register(FrameDefinition::new("F_official", "2.0", "Official")).unwrap();
        r
    }

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_builder_supplies_no_defaults() {
        assert_eq!(QueryBuilder::new().build(), DraftQuery::default());
    }

    #[test]
    fn test_claims_query() {
        let ir = QueryBuilder::new()
            .claims()
            .meant()
            .visible()
            .under_frame("F_official", None)
            .as_of(t(10))
            .matching("outage")
            .filter("region", PredicateOp::Eq, "EMEA")
            .pick_one("highest certainty under frame")
            .validate(&registry())
            .unwrap();
        assert_eq!(ir.mode(), Mode::Meant);
        assert_eq!(ir.pattern().filters.len(), 1);
        assert!(ir.conflict_policy().permits_selection());
    }

    #[test]
    fn test_exists_requests_metadata() {
        let draft = QueryBuilder::new().exists().build();
        assert!(draft.returns.fields.contains(VISIBILITY_METADATA_FIELD));
    }

    #[test]
    fn test_absence_query() {
        let ir = QueryBuilder::new()
            .absences()
            .given()
            .visible()
            .under_frame("F_official", Some("2.0"))
            .between(t(1), t(31))
            .expecting(ExpectationRef::new("exp-42"))
            .grounding_pointer("assertion-7")
            .conflict_policy(ConflictPolicyKind::ExposeAll)
            .validate(&registry())
            .unwrap();
        let absence = ir.absence().unwrap();
        assert_eq!(absence.expectation.expectation_id, "exp-42");
        assert_eq!(absence.window, TimeSpec::between(t(1), t(31)).unwrap());
    }

    #[test]
    fn test_absence_scope_reaches_ir() {
        let ir = QueryBuilder::new()
            .absences()
            .given()
            .visible()
            .under_frame("F_official", None)
            .between(t(1), t(31))
            .expecting(ExpectationRef::new("exp-42"))
            .grounding_pointer("assertion-7")
            .absence_scope("region", "EMEA")
            .absence_scope("tier", 2_i64)
            .conflict_policy(ConflictPolicyKind::ExposeAll)
            .validate(&registry())
            .unwrap();
        let scope = &ir.absence().unwrap().scope;
        assert_eq!(scope.len(), 2);
        assert_eq!(scope.get("tier"), Some(&Value::from(2_i64)));
    }

    #[test]
    fn test_expectation_store_pins_version() {
        let store = InMemoryExpectationRegistry::new();
        store
            .register(
                ExpectationDefinition::new("exp-42", "1", "Daily")
                    .with_rule(ExpectationRule::new(ExpectationFrequency::Daily)),
            )
            .unwrap();
        let ir = QueryBuilder::new()
            .absences()
            .given()
            .visible()
            .under_frame("F_official", None)
            .as_of(t(7))
            .expecting(ExpectationRef::new("exp-42"))
            .grounding_pointer("assertion-7")
            .conflict_policy(ConflictPolicyKind::ExposeAll)
            .validate_with_expectations(&registry(), &store)
            .unwrap();
        let absence = ir.absence().unwrap();
        assert_eq!(absence.expectation.version.as_deref(), Some("1"));
        assert_eq!(absence.window, TimeSpec::between(t(7), t(8)).unwrap());
    }

    #[test]
    fn test_trace_query() {
        let ir = QueryBuilder::new()
            .traces()
            .given()
            .visible()
            .under_frame("F_official", None)
            .as_of(t(3))
            .with_trace(2)
            .grounded_by(Predicate::eq("source.kind", "sensor"))
            .conflict_policy(ConflictPolicyKind::Rank)
            .validate(&registry())
            .unwrap();
        assert!(ir.trace_enabled());
        assert_eq!(ir.trace().unwrap().grounded_by.len(), 1);
    }

    #[test]
    fn test_inverted_between_rejected_at_validation() {
        let v = QueryBuilder::new()
            .claims()
            .given()
            .visible()
            .under_frame("F_official", None)
            .between(t(9), t(1))
            .conflict_policy(ConflictPolicyKind::ExposeAll)
            .validate(&registry())
            .unwrap_err();
        assert!(v.has_at(InvariantId::I2, "time"));
    }
}

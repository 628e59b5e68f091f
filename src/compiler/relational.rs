//! Reference relational compiler.
//!
//! Produces an ordered list of relational-style steps plus an output schema.
//! The mapping rules here are the ones every backend must preserve:
//!
//! | Declared            | Plan shape                                              |
//! |---------------------|---------------------------------------------------------|
//! | `EXPOSE_ALL`        | one row per distinct claim, no merging step             |
//! | `CLUSTER`           | cluster key assigned, every member kept                 |
//! | `RANK`              | explicit score column, no row removed                   |
//! | `PICK_ONE(rule)`    | one explicit `SelectByRule` step carrying the rule      |
//! | `MEANT` / `GIVEN`   | constant mode column; no union unless combined view      |
//! | `EXISTS`            | non-nullable `visibility_metadata` column               |
//!
//! Absence queries produce a structured absence record, never a nullable
//! scalar. An absence sub-query on another target adds a non-nullable
//! `absences` column instead, and an enabled trace on CLAIMS or FRAMES adds a
//! non-nullable `grounding` column.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::absence::GroundingPointer;
use crate::compiler::{ensure_capabilities, BackendId, Capability, CapabilitySet, Compiler, Plan};
use crate::conflict::{ConflictPolicy, SelectionRule};
use crate::error::CompileError;
use crate::expectation::ResolvedExpectation;
use crate::frame::ResolvedFrame;
use crate::ir::{Mode, Target, ValidatedIr, Visibility, VISIBILITY_METADATA_FIELD};
use crate::pattern::Predicate;
use crate::time::TimeSpec;
use crate::value::Value;

/// Backend id of the reference compiler.
pub const RELATIONAL_BACKEND: &str = "relational";

/// Column grouping conflicting claims.
const CONFLICT_SET_COLUMN: &str = "conflict_set_id";

/// Column holding derived absence records on non-ABSENCES targets.
pub const ABSENCES_COLUMN: &str = "absences";

/// Column holding the grounding trail of each CLAIMS or FRAMES row.
pub const GROUNDING_COLUMN: &str = "grounding";

/// One step of a relational plan, applied in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PlanStep {
    /// Reconstruct the world at (or over) the query time.
    Replay {
        /// The IR time, verbatim.
        time: TimeSpec,
    },
    /// Interpret rows under one concrete frame version.
    ApplyFrame {
        /// The IR frame, verbatim.
        frame: ResolvedFrame,
    },
    /// Keep rows of the listed modes; rows keep their mode tag.
    SelectMode {
        /// One mode, or both for an explicit combined view.
        modes: Vec<Mode>,
    },
    /// Apply the match pattern.
    Filter {
        /// Free-text match, if any.
        match_text: Option<String>,
        /// Structured predicates, all of which must hold.
        predicates: Vec<Predicate>,
    },
    /// Walk grounding edges from each row.
    TraverseGrounding {
        /// Hop limit.
        max_depth: u32,
        /// Predicates a grounding edge must satisfy.
        grounded_by: Vec<Predicate>,
    },
    /// Emit one record per expected occurrence missing from the window.
    DeriveAbsences {
        /// The expectation as resolved during validation.
        expectation: ResolvedExpectation,
        /// Concrete window the absence is evaluated over.
        window: TimeSpec,
        /// Assertions backing the expectation.
        grounding_pointers: Vec<GroundingPointer>,
        /// Scope refinements, passed through untouched.
        scope: BTreeMap<String, Value>,
    },
    /// Drop rows that are not visible.
    FilterVisible,
    /// Attach `{scope, visible, note}` metadata to every row.
    AnnotateVisibility { column: String },
    /// Keep one row per distinct claim.
    PreserveAll,
    /// Assign a cluster id per conflict set, keeping every member.
    ClusterConflicts {
        /// Column identifying a conflict set.
        cluster_key: String,
        /// Output column receiving the cluster id.
        cluster_column: String,
    },
    /// Score conflicting rows without removing any.
    RankConflicts {
        /// Column identifying a conflict set.
        partition_by: String,
        /// Output column receiving the score.
        score_column: String,
    },
    /// Explicit ordering plus limit, exactly as declared by the caller.
    SelectByRule {
        /// The caller's selection rule.
        rule: SelectionRule,
        /// Column identifying a conflict set.
        partition_by: String,
        /// Rows kept per conflict set.
        limit: u32,
    },
}

impl PlanStep {
    /// Returns true if the step can reduce several distinct claims to fewer
    /// rows. Only an explicit PICK_ONE selection may do that.
    #[must_use]
    pub const fn merges_claims(&self) -> bool {
        matches!(self, Self::SelectByRule { .. })
    }
}

/// The structured record type a plan returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    /// Claim rows.
    Claim,
    /// Derived absence records.
    Absence,
    /// Frame rows.
    Frame,
    /// Grounding trace rows.
    Trace,
}

/// Logical type of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    /// Opaque identifier.
    Id,
    /// UTF-8 text.
    Text,
    /// Signed integer.
    Int,
    /// Double-precision float.
    Float,
    /// UTC timestamp.
    Timestamp,
    /// Arbitrary JSON value.
    Json,
    /// List of scalars.
    List,
    /// `GIVEN` or `MEANT`.
    Mode,
    /// `{scope, visible, note}` object.
    VisibilityMetadata,
    /// List of `{expectation_id, window_start, window_end,
    /// grounding_pointers}` records; empty when nothing is missing.
    AbsenceRecords,
    /// List of `{depth, grounding_pointer, method}` hops.
    GroundingTrace,
}

/// One output column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Logical type.
    pub column_type: ColumnType,
    /// Whether rows may carry null.
    pub nullable: bool,
    /// Set when every row carries the same value.
    pub constant: Option<Value>,
}

impl Column {
    fn new(name: &str, column_type: ColumnType) -> Self {
        Self {
            name: name.to_string(),
            column_type,
            nullable: false,
            constant: None,
        }
    }

    fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    fn constant(mut self, value: impl Into<Value>) -> Self {
        self.constant = Some(value.into());
        self
    }
}

/// Shape of the rows a plan returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    /// Record type of each row.
    pub record: RecordKind,
    /// Columns in output order.
    pub columns: Vec<Column>,
}

impl OutputSchema {
    /// Looks a column up by name.
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// The reference backend payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationalPlan {
    /// Steps in execution order.
    pub steps: Vec<PlanStep>,
    /// Shape of the result.
    pub output: OutputSchema,
}

impl RelationalPlan {
    /// Decodes the payload of a plan produced by a relational compiler.
    ///
    /// # Errors
    ///
    /// `Payload` if the plan does not carry a relational payload.
    pub fn from_plan(plan: &Plan) -> Result<Self, CompileError> {
        serde_json::from_value(plan.payload().clone()).map_err(|e| CompileError::Payload {
            message: format!("not a relational plan: {e}"),
        })
    }

    /// Steps that may merge distinct claims.
    pub fn merging_steps(&self) -> impl Iterator<Item = &PlanStep> {
        self.steps.iter().filter(|s| s.merges_claims())
    }
}

/// The reference compiler.
#[derive(Debug, Clone)]
pub struct RelationalCompiler {
    backend_id: BackendId,
    capabilities: CapabilitySet,
}

impl Default for RelationalCompiler {
    fn default() -> Self {
        Self::new()
    }
}

impl RelationalCompiler {
    /// A compiler supporting every capability.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backend_id: BackendId::new(RELATIONAL_BACKEND),
            capabilities: CapabilitySet::all(),
        }
    }

    /// Drops a capability; the compiler then refuses every IR needing it.
    #[must_use]
    pub fn without(mut self, capability: Capability) -> Self {
        self.capabilities = self.capabilities.without(capability);
        self
    }

    /// Registers the compiler under a different backend id.
    #[must_use]
    pub fn with_backend_id(mut self, backend_id: impl Into<String>) -> Self {
        self.backend_id = BackendId::new(backend_id);
        self
    }

    /// Builds the relational payload for `ir` without capability checks.
    #[must_use]
    pub fn plan_for(ir: &ValidatedIr) -> RelationalPlan {
        RelationalPlan {
            steps: steps_for(ir),
            output: output_for(ir),
        }
    }
}

impl Compiler for RelationalCompiler {
    fn backend_id(&self) -> &BackendId {
        &self.backend_id
    }

    fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    fn compile(&self, ir: &ValidatedIr) -> Result<Plan, CompileError> {
        ensure_capabilities(&self.backend_id, &self.capabilities, ir)?;

        let relational = Self::plan_for(ir);
        let payload = serde_json::to_value(&relational).map_err(|e| CompileError::Payload {
            message: e.to_string(),
        })?;
        let plan = Plan::new(&self.backend_id, ir, payload);

        tracing::debug!(
            backend = %self.backend_id,
            digest = %plan.provenance().source_ir_digest,
            steps = relational.steps.len(),
            "compiled plan"
        );
        Ok(plan)
    }
}

fn steps_for(ir: &ValidatedIr) -> Vec<PlanStep> {
    let mut steps = vec![
        PlanStep::Replay {
            time: ir.time().clone(),
        },
        PlanStep::ApplyFrame {
            frame: ir.frame().clone(),
        },
        PlanStep::SelectMode {
            modes: if ir.returns().combined_modes() {
                vec![Mode::Given, Mode::Meant]
            } else {
                vec![ir.mode()]
            },
        },
    ];

    let pattern = ir.pattern();
    if !pattern.is_unconstrained() {
        steps.push(PlanStep::Filter {
            match_text: pattern.match_text.clone(),
            predicates: pattern.filters.clone(),
        });
    }

    if let Some(trace) = ir.trace().filter(|t| t.enabled) {
        steps.push(PlanStep::TraverseGrounding {
            max_depth: trace.max_depth.unwrap_or(1),
            grounded_by: trace.grounded_by.clone(),
        });
    }

    if let Some(absence) = ir.absence() {
        steps.push(PlanStep::DeriveAbsences {
            expectation: absence.expectation.clone(),
            window: absence.window.clone(),
            grounding_pointers: absence.grounding_pointers.clone(),
            scope: absence.scope.clone(),
        });
    }

    steps.push(match ir.visibility() {
        Visibility::Visible => PlanStep::FilterVisible,
        Visibility::Exists => PlanStep::AnnotateVisibility {
            column: VISIBILITY_METADATA_FIELD.to_string(),
        },
    });

    steps.push(match ir.conflict_policy() {
        ConflictPolicy::ExposeAll => PlanStep::PreserveAll,
        ConflictPolicy::Cluster => PlanStep::ClusterConflicts {
            cluster_key: CONFLICT_SET_COLUMN.to_string(),
            cluster_column: "cluster_id".to_string(),
        },
        ConflictPolicy::Rank => PlanStep::RankConflicts {
            partition_by: CONFLICT_SET_COLUMN.to_string(),
            score_column: "rank_score".to_string(),
        },
        ConflictPolicy::PickOne { selection_rule } => PlanStep::SelectByRule {
            rule: selection_rule.clone(),
            partition_by: CONFLICT_SET_COLUMN.to_string(),
            limit: 1,
        },
    });

    steps
}

fn output_for(ir: &ValidatedIr) -> OutputSchema {
    let (record, mut columns) = match ir.target() {
        Target::Claims => (
            RecordKind::Claim,
            vec![
                Column::new("claim_id", ColumnType::Id),
                Column::new("subject", ColumnType::Text),
                Column::new("predicate", ColumnType::Text),
                Column::new("value", ColumnType::Json),
                Column::new("asserted_at", ColumnType::Timestamp),
                Column::new(CONFLICT_SET_COLUMN, ColumnType::Id).nullable(),
            ],
        ),
        Target::Absences => (
            RecordKind::Absence,
            vec![
                Column::new("absence_id", ColumnType::Id),
                Column::new("expectation_id", ColumnType::Text),
                Column::new("window_start", ColumnType::Timestamp),
                Column::new("window_end", ColumnType::Timestamp),
                Column::new("grounding_pointers", ColumnType::List),
                Column::new(CONFLICT_SET_COLUMN, ColumnType::Id).nullable(),
            ],
        ),
        Target::Frames => (
            RecordKind::Frame,
            vec![
                Column::new("frame_id", ColumnType::Text),
                Column::new("version", ColumnType::Text),
                Column::new("digest", ColumnType::Text),
                Column::new(CONFLICT_SET_COLUMN, ColumnType::Id).nullable(),
            ],
        ),
        Target::Traces => (
            RecordKind::Trace,
            vec![
                Column::new("claim_id", ColumnType::Id),
                Column::new("depth", ColumnType::Int),
                Column::new("grounding_pointer", ColumnType::Text),
                Column::new("method", ColumnType::Text).nullable(),
                Column::new(CONFLICT_SET_COLUMN, ColumnType::Id).nullable(),
            ],
        ),
    };

    if ir.absence().is_some() && ir.target() != Target::Absences {
        columns.push(Column::new(ABSENCES_COLUMN, ColumnType::AbsenceRecords));
    }
    if ir.trace_enabled() && matches!(ir.target(), Target::Claims | Target::Frames) {
        columns.push(Column::new(GROUNDING_COLUMN, ColumnType::GroundingTrace));
    }

    let mode = Column::new("mode", ColumnType::Mode);
    columns.push(if ir.returns().combined_modes() {
        mode
    } else {
        mode.constant(ir.mode().to_string())
    });

    match ir.conflict_policy() {
        ConflictPolicy::ExposeAll => {}
        ConflictPolicy::Cluster => columns.push(Column::new("cluster_id", ColumnType::Id)),
        ConflictPolicy::Rank => columns.push(Column::new("rank_score", ColumnType::Float)),
        ConflictPolicy::PickOne { selection_rule } => columns.push(
            Column::new("selection_rule", ColumnType::Text).constant(selection_rule.rule.as_str()),
        ),
    }

    if ir.visibility() == Visibility::Exists {
        columns.push(Column::new(
            VISIBILITY_METADATA_FIELD,
            ColumnType::VisibilityMetadata,
        ));
    }

    for field in ir.returns().fields() {
        if !columns.iter().any(|c| &c.name == field) {
            columns.push(Column::new(field, ColumnType::Json).nullable());
        }
    }

    OutputSchema { record, columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::absence::{DraftAbsence, ExpectationRef};
    use serde_json::json;
    use crate::conflict::ConflictPolicyKind;
    use crate::frame::{FrameDefinition, FrameRef};
    use crate::ir::{validate, DraftQuery, TraceSpec};
    use crate::registry::InMemoryFrameRegistry;
    use chrono::{TimeZone, Utc};

    fn ir_with(edit: impl FnOnce(&mut DraftQuery)) -> ValidatedIr {
        let registry = InMemoryFrameRegistry::new();
        registry.register(FrameDefinition::new("F", "1", "F")).unwrap();
        let mut draft = DraftQuery {
            target: Some(Target::Claims),
            mode: Some(Mode::Given),
            visibility: Some(Visibility::Visible),
            frame: Some(FrameRef::new("F")),
            time: Some(TimeSpec::as_of(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())),
            ..DraftQuery::default()
        };
        draft.returns.conflict_policy = Some(ConflictPolicyKind::ExposeAll);
        edit(&mut draft);
        validate(&draft, &registry).unwrap()
    }

    fn compile(ir: &ValidatedIr) -> RelationalPlan {
        let plan = RelationalCompiler::new().compile(ir).unwrap();
        RelationalPlan::from_plan(&plan).unwrap()
    }

    #[test]
    fn test_expose_all_has_no_merging_step() {
        let plan = compile(&ir_with(|_| {}));
        assert_eq!(plan.merging_steps().count(), 0);
        assert!(plan.steps.contains(&PlanStep::PreserveAll));
        assert_eq!(plan.output.record, RecordKind::Claim);
    }

    #[test]
    fn test_cluster_keeps_members() {
        let plan = compile(&ir_with(|d| {
            d.returns.conflict_policy = Some(ConflictPolicyKind::Cluster);
        }));
        assert_eq!(plan.merging_steps().count(), 0);
        assert!(plan
            .steps
            .iter()
            .any(|s| matches!(s, PlanStep::ClusterConflicts { .. })));
        assert!(plan.output.column("cluster_id").is_some());
    }

    #[test]
    fn test_rank_adds_score() {
        let plan = compile(&ir_with(|d| {
            d.returns.conflict_policy = Some(ConflictPolicyKind::Rank);
        }));
        assert_eq!(plan.merging_steps().count(), 0);
        assert_eq!(
            plan.output.column("rank_score").unwrap().column_type,
            ColumnType::Float
        );
    }

    #[test]
    fn test_pick_one_is_explicit() {
        let plan = compile(&ir_with(|d| {
            d.returns.conflict_policy = Some(ConflictPolicyKind::PickOne);
            d.returns.selection_rule = Some(SelectionRule::new("highest certainty under frame"));
        }));
        let selecting: Vec<_> = plan.merging_steps().collect();
        assert_eq!(selecting.len(), 1);
        match selecting[0] {
            PlanStep::SelectByRule { rule, limit, .. } => {
                assert_eq!(rule.rule, "highest certainty under frame");
                assert_eq!(*limit, 1);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_meant_rows_tagged() {
        let plan = compile(&ir_with(|d| d.mode = Some(Mode::Meant)));
        let mode = plan.output.column("mode").unwrap();
        assert_eq!(mode.constant, Some(Value::from("MEANT")));
        assert!(plan
            .steps
            .contains(&PlanStep::SelectMode { modes: vec![Mode::Meant] }));
    }

    #[test]
    fn test_combined_view_only_when_requested() {
        let plan = compile(&ir_with(|d| d.returns.combined_modes = true));
        assert!(plan.output.column("mode").unwrap().constant.is_none());
        assert!(plan.steps.contains(&PlanStep::SelectMode {
            modes: vec![Mode::Given, Mode::Meant]
        }));
    }

    #[test]
    fn test_exists_adds_metadata_column() {
        let plan = compile(&ir_with(|d| {
            d.visibility = Some(Visibility::Exists);
            d.returns.fields.insert(VISIBILITY_METADATA_FIELD.to_string());
        }));
        let col = plan.output.column(VISIBILITY_METADATA_FIELD).unwrap();
        assert_eq!(col.column_type, ColumnType::VisibilityMetadata);
        assert!(!col.nullable);
        assert_eq!(
            plan.output
                .columns
                .iter()
                .filter(|c| c.name == VISIBILITY_METADATA_FIELD)
                .count(),
            1
        );
    }

    #[test]
    fn test_absence_record_is_structured() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        let plan = compile(&ir_with(|d| {
            d.target = Some(Target::Absences);
            d.time = Some(TimeSpec::between(start, end).unwrap());
            d.absence = Some(DraftAbsence {
                expectation_ref: Some(ExpectationRef::new("exp-42")),
                grounding_pointers: vec!["assertion-7".into()],
                ..DraftAbsence::default()
            });
        }));
        assert_eq!(plan.output.record, RecordKind::Absence);
        assert!(plan.output.columns.iter().filter(|c| c.name != CONFLICT_SET_COLUMN).all(|c| !c.nullable));
        assert!(plan
            .steps
            .iter()
            .any(|s| matches!(s, PlanStep::DeriveAbsences { .. })));
    }

    fn absence_draft(scope: BTreeMap<String, Value>) -> DraftAbsence {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
        DraftAbsence {
            expectation_ref: Some(ExpectationRef::new("exp-42")),
            window: Some(TimeSpec::between(start, end).unwrap()),
            grounding_pointers: vec!["assertion-7".into()],
            scope,
        }
    }

    #[test]
    fn test_derive_step_carries_whole_absence() {
        let mut scope = BTreeMap::new();
        scope.insert("region".to_string(), Value::from("emea"));
        let ir = ir_with(|d| {
            d.target = Some(Target::Absences);
            d.absence = Some(absence_draft(scope.clone()));
        });
        let plan = compile(&ir);
        let absence = ir.absence().unwrap();
        let derive = plan
            .steps
            .iter()
            .find(|s| matches!(s, PlanStep::DeriveAbsences { .. }))
            .unwrap();
        assert_eq!(
            derive,
            &PlanStep::DeriveAbsences {
                expectation: absence.expectation.clone(),
                window: absence.window.clone(),
                grounding_pointers: absence.grounding_pointers.clone(),
                scope,
            }
        );
        let payload = serde_json::to_value(derive).unwrap();
        assert_eq!(
            payload["scope"],
            json!({"region": {"type": "string", "value": "emea"}})
        );
    }

    #[test]
    fn test_absence_subquery_adds_structured_column() {
        let plan = compile(&ir_with(|d| d.absence = Some(absence_draft(BTreeMap::new()))));
        assert_eq!(plan.output.record, RecordKind::Claim);
        let col = plan.output.column(ABSENCES_COLUMN).unwrap();
        assert_eq!(col.column_type, ColumnType::AbsenceRecords);
        assert!(!col.nullable);

        let absences = compile(&ir_with(|d| {
            d.target = Some(Target::Absences);
            d.absence = Some(absence_draft(BTreeMap::new()));
        }));
        assert!(absences.output.column(ABSENCES_COLUMN).is_none());
    }

    #[test]
    fn test_trace_adds_grounding_column_on_claims_and_frames() {
        for target in [Target::Claims, Target::Frames] {
            let plan = compile(&ir_with(|d| {
                d.target = Some(target);
                d.trace = Some(TraceSpec::enabled(2));
            }));
            let col = plan.output.column(GROUNDING_COLUMN).unwrap();
            assert_eq!(col.column_type, ColumnType::GroundingTrace);
            assert!(!col.nullable);
        }

        let traces = compile(&ir_with(|d| {
            d.target = Some(Target::Traces);
            d.trace = Some(TraceSpec::enabled(2));
        }));
        assert!(traces.output.column(GROUNDING_COLUMN).is_none());
        assert!(compile(&ir_with(|_| {})).output.column(GROUNDING_COLUMN).is_none());
    }

    #[test]
    fn test_refuses_trace_without_grounding() {
        let ir = ir_with(|d| d.trace = Some(TraceSpec::enabled(3)));
        let err = RelationalCompiler::new()
            .without(Capability::GroundingTraversal)
            .compile(&ir)
            .unwrap_err();
        assert!(err.is_refusal());

        let plan = compile(&ir);
        assert!(plan.steps.contains(&PlanStep::TraverseGrounding {
            max_depth: 3,
            grounded_by: Vec::new()
        }));
    }

    #[test]
    fn test_compilation_is_deterministic() {
        let ir = ir_with(|d| d.returns.conflict_policy = Some(ConflictPolicyKind::Rank));
        let c = RelationalCompiler::new();
        assert_eq!(c.compile(&ir).unwrap(), c.compile(&ir).unwrap());
    }
}

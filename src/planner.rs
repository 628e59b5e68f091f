//! End-to-end planning: draft → (materialize) → validate → compile.

use std::sync::Arc;

use crate::compiler::{CompilerSet, Plan, RelationalCompiler};
use crate::config::PlannerConfig;
use crate::error::{EoqlResult, Violations};
use crate::ir::{validate, validate_with_expectations, DraftQuery, ValidatedIr};
use crate::materialize::{materialize, MaterializationPolicy, Materialized};
use crate::registry::{
    CachingFrameRegistry, DeadlineFrameRegistry, ExpectationRegistry, FrameRegistry,
};

/// Wires a frame registry and a set of compilers together.
///
/// A planner holds no per-query state and may be shared across threads.
#[derive(Clone)]
pub struct Planner {
    registry: Arc<dyn FrameRegistry>,
    compilers: CompilerSet,
    materialization: Option<MaterializationPolicy>,
    expectations: Option<Arc<dyn ExpectationRegistry>>,
}

impl std::fmt::Debug for Planner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Planner")
            .field("compilers", &self.compilers)
            .field("materialization", &self.materialization)
            .field("resolves_expectations", &self.expectations.is_some())
            .finish_non_exhaustive()
    }
}

impl Planner {
    /// Creates a planner with no materialization and no expectation
    /// registry.
    pub fn new(registry: Arc<dyn FrameRegistry>, compilers: CompilerSet) -> Self {
        Self {
            registry,
            compilers,
            materialization: None,
            expectations: None,
        }
    }

    /// Builds the standard stack from configuration: the registry is wrapped
    /// in a lookup deadline and then a client-side cache, and the reference
    /// relational compiler is installed.
    pub fn from_config<R: FrameRegistry + 'static>(config: &PlannerConfig, registry: R) -> Self {
        let bounded = DeadlineFrameRegistry::with_pool(
            registry,
            config.registry_timeout(),
            config.registry_workers,
            config.registry_queue_capacity,
        );
        let cached = CachingFrameRegistry::new(bounded, config.registry_cache_capacity);
        let compilers = CompilerSet::new().with(RelationalCompiler::new());
        Self {
            registry: Arc::new(cached),
            compilers,
            materialization: config.materialization.clone(),
            expectations: None,
        }
    }

    /// Applies `policy` to every draft before validation.
    #[must_use]
    pub fn with_materialization(mut self, policy: MaterializationPolicy) -> Self {
        self.materialization = Some(policy);
        self
    }

    /// Resolves absence expectations against `expectations` during
    /// validation.
    #[must_use]
    pub fn with_expectations(mut self, expectations: Arc<dyn ExpectationRegistry>) -> Self {
        self.expectations = Some(expectations);
        self
    }

    /// Installed compilers.
    pub fn compilers(&self) -> &CompilerSet {
        &self.compilers
    }

    /// The frame registry consulted during validation.
    pub fn registry(&self) -> &Arc<dyn FrameRegistry> {
        &self.registry
    }

    /// Applies configured defaults to a draft without validating it.
    ///
    /// With no materialization policy the draft comes back unchanged and
    /// nothing is reported as filled.
    #[must_use]
    pub fn prepare(&self, draft: &DraftQuery) -> Materialized {
        let Some(policy) = &self.materialization else {
            return Materialized {
                draft: draft.clone(),
                filled: Vec::new(),
            };
        };
        let prepared = materialize(draft.clone(), policy);
        if !prepared.filled.is_empty() {
            let filled: Vec<String> = prepared.filled.iter().map(ToString::to_string).collect();
            tracing::info!(?filled, "materialized defaults");
        }
        prepared
    }

    /// Validates a draft, applying configured defaults first.
    ///
    /// # Errors
    ///
    /// Every violation the validator finds.
    pub fn validate(&self, draft: &DraftQuery) -> Result<ValidatedIr, Violations> {
        let prepared = self.prepare(draft);
        match &self.expectations {
            Some(expectations) => validate_with_expectations(
                &prepared.draft,
                self.registry.as_ref(),
                expectations.as_ref(),
            ),
            None => validate(&prepared.draft, self.registry.as_ref()),
        }
    }

    /// Validates a draft and compiles it for `backend_id`.
    ///
    /// # Errors
    ///
    /// `Validation` with every violation, or `Compile` for unknown backends
    /// and capability refusals.
    pub fn plan(&self, draft: &DraftQuery, backend_id: &str) -> EoqlResult<Plan> {
        let ir = self.validate(draft)?;
        let plan = self.compilers.compile(&ir, backend_id)?;
        tracing::debug!(
            backend = backend_id,
            plan_id = %plan.plan_id(),
            digest = %plan.provenance().source_ir_digest,
            "planned query"
        );
        Ok(plan)
    }

    /// Parses a JSON draft and plans it.
    ///
    /// # Errors
    ///
    /// `Schema` for malformed input, otherwise as [`Self::plan`].
    pub fn plan_json(&self, json: &str, backend_id: &str) -> EoqlResult<Plan> {
        let draft = DraftQuery::from_json(json)?;
        self.plan(&draft, backend_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::QueryBuilder;
    use crate::compiler::RELATIONAL_BACKEND;
    use crate::absence::ExpectationRef;
    use crate::conflict::ConflictPolicyKind;
    use crate::error::{EoqlError, InvariantId};
    use crate::frame::{FrameDefinition, FrameRef};
    use crate::expectation::{ExpectationDefinition, ExpectationFrequency, ExpectationRule};
    use crate::materialize::MaterializedField;
    use crate::registry::{InMemoryExpectationRegistry, InMemoryFrameRegistry};
    use crate::time::TimeSpec;
    use chrono::{TimeZone, Utc};

    fn registry() -> InMemoryFrameRegistry {
        let r = InMemoryFrameRegistry::new();
        r.register(FrameDefinition::new("F_official", "2.0", "Official")).unwrap();
        r
    }

    fn complete() -> QueryBuilder {
        QueryBuilder::new()
            .claims()
            .given()
            .visible()
            .under_frame("F_official", None)
            .as_of(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap())
            .conflict_policy(ConflictPolicyKind::Cluster)
    }

    #[test]
    fn test_plan_relational() {
        let planner = Planner::from_config(&PlannerConfig::default(), registry());
        let plan = planner.plan(&complete().build(), RELATIONAL_BACKEND).unwrap();
        assert_eq!(plan.backend_id().as_str(), RELATIONAL_BACKEND);
        assert_eq!(plan.frame().resolved_version, "2.0");
    }

    #[test]
    fn test_unknown_backend() {
        let planner = Planner::from_config(&PlannerConfig::default(), registry());
        let err = planner.plan(&complete().build(), "graph").unwrap_err();
        assert!(err.is_compile());
    }

    #[test]
    fn test_no_implicit_defaults() {
        let planner = Planner::from_config(&PlannerConfig::default(), registry());
        let draft = QueryBuilder::new().claims().given().visible().build();
        let err = planner.plan(&draft, RELATIONAL_BACKEND).unwrap_err();
        let v = err.violations().unwrap();
        assert!(v.has(InvariantId::I1));
        assert!(v.has(InvariantId::I2));
        assert!(v.has(InvariantId::I7));
    }

    #[test]
    fn test_configured_materialization() {
        let config = PlannerConfig {
            materialization: Some(MaterializationPolicy {
                frame: Some(FrameRef::pinned("F_official", "2.0")),
                time: Some(TimeSpec::as_of(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())),
                conflict_policy: Some(ConflictPolicyKind::ExposeAll),
            }),
            ..PlannerConfig::default()
        };
        let planner = Planner::from_config(&config, registry());
        let draft = QueryBuilder::new().claims().given().visible().build();
        let ir = planner.validate(&draft).unwrap();
        assert_eq!(ir.conflict_policy().kind(), ConflictPolicyKind::ExposeAll);
    }

    #[test]
    fn test_prepare_reports_filled_fields() {
        let planner = Planner::from_config(&PlannerConfig::default(), registry())
            .with_materialization(MaterializationPolicy {
                frame: Some(FrameRef::pinned("F_official", "2.0")),
                time: None,
                conflict_policy: Some(ConflictPolicyKind::ExposeAll),
            });
        let draft = QueryBuilder::new()
            .claims()
            .given()
            .visible()
            .as_of(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
            .build();
        let prepared = planner.prepare(&draft);
        assert_eq!(
            prepared.filled,
            vec![MaterializedField::Frame, MaterializedField::ConflictPolicy]
        );
        assert_eq!(prepared.draft.time, draft.time);

        let bare = Planner::from_config(&PlannerConfig::default(), registry());
        let untouched = bare.prepare(&draft);
        assert!(untouched.filled.is_empty());
        assert_eq!(untouched.draft, draft);
    }

    #[test]
    fn test_expectations_resolved_when_installed() {
        let expectations = InMemoryExpectationRegistry::new();
        expectations
            .register(
                ExpectationDefinition::new("exp-42", "1", "Daily filing")
                    .with_rule(ExpectationRule::new(ExpectationFrequency::Daily)),
            )
            .unwrap();
        let draft = QueryBuilder::new()
            .absences()
            .given()
            .visible()
            .under_frame("F_official", None)
            .as_of(Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap())
            .conflict_policy(ConflictPolicyKind::ExposeAll)
            .expecting(ExpectationRef::new("exp-42"))
            .grounding_pointer("assertion-7")
            .build();

        let plain = Planner::from_config(&PlannerConfig::default(), registry());
        let err = plain.validate(&draft).unwrap_err();
        assert!(err.has(InvariantId::I5));

        let planner = plain.with_expectations(Arc::new(expectations));
        let ir = planner.validate(&draft).unwrap();
        let absence = ir.absence().unwrap();
        assert_eq!(absence.expectation.version.as_deref(), Some("1"));
        assert_eq!(
            absence.window,
            TimeSpec::between(
                Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap(),
                Utc.with_ymd_and_hms(2025, 3, 2, 0, 0, 0).unwrap(),
            )
            .unwrap()
        );
    }

    #[test]
    fn test_plan_json_schema_error() {
        let planner = Planner::from_config(&PlannerConfig::default(), registry());
        let err = planner.plan_json("{\"target\": 3}", RELATIONAL_BACKEND).unwrap_err();
        assert!(matches!(err, EoqlError::Schema(_)));
    }
}

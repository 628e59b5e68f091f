//! Backend compiler contract.
//!
//! A compiler turns a [`ValidatedIr`] into a backend [`Plan`] or refuses.
//! It must never reduce the ambiguity the IR declares: when a backend
//! cannot honor a requested capability it returns
//! [`CompileError::UnsupportedCapability`] instead of an approximate plan.
//!
//! The plan envelope (declared conflict policy, frame, time, trace flag,
//! provenance) is built by [`Plan::new`] straight from the IR, so every
//! backend carries the declared conflict policy verbatim. The backend
//! payload is opaque to the core.

pub mod conformance;
mod relational;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conflict::ConflictPolicy;
use crate::error::CompileError;
use crate::frame::ResolvedFrame;
use crate::ir::{IrDigest, Target, ValidatedIr, Visibility};
use crate::time::TimeSpec;

pub use relational::{
    Column, ColumnType, OutputSchema, PlanStep, RecordKind, RelationalCompiler, RelationalPlan,
    ABSENCES_COLUMN, GROUNDING_COLUMN, RELATIONAL_BACKEND,
};

/// Namespace for deterministic plan ids.
const PLAN_NAMESPACE: Uuid = Uuid::from_u128(0x6e0f_5c1a_3b7d_4f42_9a18_2c5e_d0b4_71a3);

/// Identifier of an execution backend.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackendId(String);

impl BackendId {
    /// Wraps a backend id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BackendId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for BackendId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something a backend must be able to do faithfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// AS_OF world reconstruction and interval selection.
    TimeReplay,
    /// Applying a resolved frame's interpretation policy.
    FrameFilter,
    /// Tagging every row with its GIVEN/MEANT mode.
    ModeTagging,
    /// Presenting GIVEN and MEANT rows together, still tagged.
    CombinedModeView,
    /// Emitting visibility metadata per item.
    VisibilityMetadata,
    /// Walking grounding links to a bounded depth.
    GroundingTraversal,
    /// Computing absences from expectations.
    AbsenceDerivation,
    /// Grouping conflicting claims without dropping members.
    ConflictClustering,
    /// Scoring conflicting claims without dropping any.
    ConflictRanking,
    /// Applying a caller-declared PICK_ONE rule as an explicit step.
    ExplicitSelection,
    /// Evaluating match text and structured predicates.
    PatternFilter,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Self; 11] = [
        Self::TimeReplay,
        Self::FrameFilter,
        Self::ModeTagging,
        Self::CombinedModeView,
        Self::VisibilityMetadata,
        Self::GroundingTraversal,
        Self::AbsenceDerivation,
        Self::ConflictClustering,
        Self::ConflictRanking,
        Self::ExplicitSelection,
        Self::PatternFilter,
    ];

    /// Stable snake_case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::TimeReplay => "time_replay",
            Self::FrameFilter => "frame_filter",
            Self::ModeTagging => "mode_tagging",
            Self::CombinedModeView => "combined_mode_view",
            Self::VisibilityMetadata => "visibility_metadata",
            Self::GroundingTraversal => "grounding_traversal",
            Self::AbsenceDerivation => "absence_derivation",
            Self::ConflictClustering => "conflict_clustering",
            Self::ConflictRanking => "conflict_ranking",
            Self::ExplicitSelection => "explicit_selection",
            Self::PatternFilter => "pattern_filter",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The set of capabilities a backend supports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    /// Every known capability.
    #[must_use]
    pub fn all() -> Self {
        Self(Capability::ALL.into_iter().collect())
    }

    /// No capabilities.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Adds a capability.
    #[must_use]
    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    /// Removes a capability.
    #[must_use]
    pub fn without(mut self, capability: Capability) -> Self {
        self.0.remove(&capability);
        self
    }

    /// Returns true if `capability` is declared.
    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    /// Declared capabilities in order.
    pub fn iter(&self) -> impl Iterator<Item = Capability> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<T: IntoIterator<Item = Capability>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Capabilities an IR needs, each with the reason it is needed.
#[must_use]
pub fn required_capabilities(ir: &ValidatedIr) -> Vec<(Capability, String)> {
    let mut needed = vec![
        (Capability::TimeReplay, format!("query time is {}", ir.time().kind_name())),
        (Capability::FrameFilter, format!("query is under frame {}", ir.frame())),
        (Capability::ModeTagging, format!("{} results must stay tagged", ir.mode())),
    ];

    if ir.returns().combined_modes() {
        needed.push((
            Capability::CombinedModeView,
            "caller requested GIVEN and MEANT together".to_string(),
        ));
    }
    if ir.visibility() == Visibility::Exists {
        needed.push((
            Capability::VisibilityMetadata,
            "EXISTS requires visibility metadata on every item".to_string(),
        ));
    }
    if let Some(trace) = ir.trace().filter(|t| t.enabled) {
        needed.push((
            Capability::GroundingTraversal,
            format!(
                "trace enabled to depth {}",
                trace.max_depth.unwrap_or_default()
            ),
        ));
    }
    if ir.target() == Target::Absences || ir.absence().is_some() {
        needed.push((
            Capability::AbsenceDerivation,
            "absences must be derived from expectations".to_string(),
        ));
    }
    match ir.conflict_policy() {
        ConflictPolicy::ExposeAll => {}
        ConflictPolicy::Cluster => needed.push((
            Capability::ConflictClustering,
            "conflict policy is CLUSTER".to_string(),
        )),
        ConflictPolicy::Rank => needed.push((
            Capability::ConflictRanking,
            "conflict policy is RANK".to_string(),
        )),
        ConflictPolicy::PickOne { selection_rule } => needed.push((
            Capability::ExplicitSelection,
            format!("PICK_ONE by '{selection_rule}'"),
        )),
    }
    if !ir.pattern().is_unconstrained() {
        needed.push((
            Capability::PatternFilter,
            "pattern constrains the selection".to_string(),
        ));
    }
    needed
}

/// Refuses with the first capability `ir` needs that `supported` lacks.
///
/// # Errors
///
/// Returns [`CompileError::UnsupportedCapability`].
pub fn ensure_capabilities(
    backend_id: &BackendId,
    supported: &CapabilitySet,
    ir: &ValidatedIr,
) -> Result<(), CompileError> {
    match required_capabilities(ir)
        .into_iter()
        .find(|(c, _)| !supported.contains(*c))
    {
        Some((capability, reason)) => {
            tracing::debug!(backend = %backend_id, %capability, "compiler refused");
            Err(CompileError::UnsupportedCapability {
                backend_id: backend_id.to_string(),
                capability: capability.to_string(),
                reason,
            })
        }
        None => Ok(()),
    }
}

/// Provenance of a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Digest of the IR the plan was compiled from.
    pub source_ir_digest: IrDigest,
}

/// A compiled, backend-specific plan.
///
/// Plans are immutable hand-off values. Their envelope is copied from the
/// source IR; only `payload` is backend-defined.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    plan_id: Uuid,
    backend_id: BackendId,
    declared_conflict_policy: ConflictPolicy,
    frame: ResolvedFrame,
    time: TimeSpec,
    trace_enabled: bool,
    payload: serde_json::Value,
    provenance: Provenance,
}

impl Plan {
    /// Builds the envelope for `ir` around a backend payload.
    ///
    /// The plan id is derived from the backend and the IR digest, so the
    /// same IR compiled by the same backend always gets the same id.
    #[must_use]
    pub fn new(backend_id: &BackendId, ir: &ValidatedIr, payload: serde_json::Value) -> Self {
        let digest = ir.digest();
        let plan_id = Uuid::new_v5(
            &PLAN_NAMESPACE,
            format!("{backend_id}:{digest}").as_bytes(),
        );
        Self {
            plan_id,
            backend_id: backend_id.clone(),
            declared_conflict_policy: ir.conflict_policy().clone(),
            frame: ir.frame().clone(),
            time: ir.time().clone(),
            trace_enabled: ir.trace_enabled(),
            payload,
            provenance: Provenance {
                source_ir_digest: digest,
            },
        }
    }

    /// Deterministic id: UUID v5 over backend id and IR digest.
    pub const fn plan_id(&self) -> Uuid {
        self.plan_id
    }

    /// Backend the plan was compiled for.
    pub fn backend_id(&self) -> &BackendId {
        &self.backend_id
    }

    /// The IR's conflict policy, verbatim.
    pub fn declared_conflict_policy(&self) -> &ConflictPolicy {
        &self.declared_conflict_policy
    }

    /// The IR's frame, verbatim.
    pub fn frame(&self) -> &ResolvedFrame {
        &self.frame
    }

    /// The IR's time, verbatim.
    pub fn time(&self) -> &TimeSpec {
        &self.time
    }

    /// Whether the IR enabled tracing.
    pub const fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// Backend-defined payload.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// Where the plan came from.
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }
}

/// A backend compiler.
pub trait Compiler: Send + Sync {
    /// Id the compiler is registered under.
    fn backend_id(&self) -> &BackendId;

    /// Capabilities the backend honors faithfully.
    fn capabilities(&self) -> &CapabilitySet;

    /// Compiles `ir` into a plan.
    ///
    /// # Errors
    ///
    /// Refuses with [`CompileError::UnsupportedCapability`] whenever the
    /// backend cannot faithfully honor something the IR requests.
    fn compile(&self, ir: &ValidatedIr) -> Result<Plan, CompileError>;
}

/// Compilers keyed by backend id.
#[derive(Clone, Default)]
pub struct CompilerSet {
    compilers: BTreeMap<BackendId, Arc<dyn Compiler>>,
}

impl CompilerSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a compiler under its own backend id.
    #[must_use]
    pub fn with(mut self, compiler: impl Compiler + 'static) -> Self {
        self.insert(Arc::new(compiler));
        self
    }

    /// Adds (or replaces) a shared compiler.
    pub fn insert(&mut self, compiler: Arc<dyn Compiler>) {
        self.compilers.insert(compiler.backend_id().clone(), compiler);
    }

    /// The compiler registered for `backend_id`.
    pub fn get(&self, backend_id: &str) -> Option<&Arc<dyn Compiler>> {
        self.compilers.get(&BackendId::new(backend_id))
    }

    /// Registered backend ids, sorted.
    pub fn backend_ids(&self) -> impl Iterator<Item = &BackendId> {
        self.compilers.keys()
    }

    /// Compiles `ir` with the compiler registered for `backend_id`.
    ///
    /// # Errors
    ///
    /// `UnknownBackend` if no compiler is registered, otherwise whatever the
    /// compiler returns.
    pub fn compile(&self, ir: &ValidatedIr, backend_id: &str) -> Result<Plan, CompileError> {
        self.get(backend_id)
            .ok_or_else(|| CompileError::UnknownBackend {
                backend_id: backend_id.to_string(),
            })?
            .compile(ir)
    }
}

impl fmt::Debug for CompilerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set()
            .entries(self.compilers.keys().map(BackendId::as_str))
            .finish()
    }
}

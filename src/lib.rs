//! # EOQL - Epistemic Query Planning
//!
//! EOQL turns an epistemically ambiguous question into a fully specified,
//! machine-checkable intermediate representation, refuses any question that
//! would force an invented certainty, and hands validated IR to backend
//! compilers that must preserve the ambiguity the caller declared.
//!
//! ## Core Concepts
//!
//! - **DraftQuery**: the caller's structured question, any field possibly absent
//! - **ValidatedIr**: the immutable, fully specified question; only the validator builds one
//! - **Frame**: a named, versioned interpretation policy resolved through a registry
//! - **Plan**: a backend's compiled hand-off, carrying the declared conflict policy verbatim
//!
//! ## Usage
//!
//! ```rust,ignore
//! use eoql::{
//!     Compiler, ConflictPolicyKind, FrameDefinition, InMemoryFrameRegistry, QueryBuilder,
//!     RelationalCompiler,
//! };
//!
//! let registry = InMemoryFrameRegistry::new();
//! registry.register(FrameDefinition::new("F_official", "2.0", "Official"))?;
//!
//! let ir = QueryBuilder::new()
//!     .claims()
//!     .given()
//!     .visible()
//!     .under_frame("F_official", Some("2.0"))
//!     .as_of(at)
//!     .conflict_policy(ConflictPolicyKind::ExposeAll)
//!     .validate(&registry)?;
//!
//! let plan = RelationalCompiler::new().compile(&ir)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Value types
pub mod absence;
pub mod conflict;
pub mod error;
pub mod expectation;
pub mod frame;
pub mod pattern;
pub mod time;
pub mod value;

// IR, registry and compilers
pub mod compiler;
pub mod ir;
pub mod registry;

// Caller-side helpers and facade
pub mod audit;
pub mod builder;
pub mod config;
pub mod materialize;
pub mod planner;

pub use absence::{AbsenceSpec, DraftAbsence, ExpectationRef, GroundingPointer};
pub use conflict::{ConflictPolicy, ConflictPolicyKind, SelectionRule};
pub use error::{
    CompileError, EoqlError, EoqlResult, InvariantId, RegistryError, SchemaError,
    SerializationError, ValidationError, Violations,
};
pub use expectation::{
    ExpectationDefinition, ExpectationFrequency, ExpectationRule, ExpectationSchedule,
    ResolvedExpectation,
};
pub use frame::{FrameComparison, FrameDefinition, FrameDigest, FrameRef, KeyDiff, ResolvedFrame};
pub use pattern::{Pattern, Predicate, PredicateOp};
pub use time::TimeSpec;
pub use value::Value;

pub use compiler::{
    conformance, BackendId, Capability, CapabilitySet, Compiler, CompilerSet, Plan, Provenance,
    RelationalCompiler, RelationalPlan,
};
pub use ir::{
    diff, from_canonical_json, to_canonical_json, validate, validate_with_expectations,
    DraftQuery, DraftReturn, IrDiff, IrDigest, Mode, ReturnSpec, Target, TraceSpec, ValidatedIr,
    Visibility, VISIBILITY_METADATA_FIELD,
};
pub use registry::{
    CachingFrameRegistry, DeadlineFrameRegistry, ExpectationRegistry, FrameRegistry,
    InMemoryExpectationRegistry, InMemoryFrameRegistry,
};

pub use audit::{read_audit_log, AuditLog};
pub use builder::QueryBuilder;
pub use config::PlannerConfig;
pub use materialize::{materialize, Materialized, MaterializationPolicy, MaterializedField};
pub use planner::Planner;

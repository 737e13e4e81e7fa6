//! Memory-Model Conformance Core
//!
//! Enumeration, synthesis and stress verification of release/acquire and
//! barrier protocols between paired GPU invocations.
//!
//! # Pipeline
//!
//! 1. [`config_space`] walks the configuration axes lazily and rejects
//!    illegal combinations.
//! 2. [`domain`] fits the invocation domain to the target's limits and
//!    [`pairing`] matches every invocation with its partner.
//! 3. [`synth`] composes the synchronization semantics, builds a
//!    [`ProtocolPlan`](synth::ProtocolPlan) and renders it as GLSL.
//! 4. [`harness`] compiles and dispatches the program on an
//!    [`ExecutionBackend`](harness::ExecutionBackend) for many rounds and
//!    judges the fail buffer.
//!
//! # Example
//!
//! ```ignore
//! use mm_conformance_core::{DomainConfig, HarnessConfig, ValidationHarness};
//! use mm_types::CaseDef;
//!
//! let case: CaseDef = "message_passing/coherent_fence_fence_payload_local_buffer_guard_local_buffer_scope_device_comp".parse()?;
//! let mut harness = ValidationHarness::new(backend, HarnessConfig::from_env());
//! let report = harness.verify(&case, &DomainConfig::default())?;
//! report.ensure_passed()?;
//! ```

#![allow(clippy::result_large_err)]

pub mod config_space;
pub mod domain;
pub mod env_utils;
pub mod errors;
pub mod harness;
pub mod pairing;
pub mod report;
pub mod synth;

pub use config_space::{enumerate, validate, AxisSet, ConfigurationSpace, LegalityRule, TransitiveMode};
pub use domain::{DomainConfig, InvocationDomain, InvocationId, TargetLimits};
pub use errors::{BackendError, ConformanceError};
pub use harness::{
    required_features, Command, ExecutionBackend, Feature, HarnessConfig, HostBarrier,
    ValidationHarness,
};
pub use pairing::{buffer_position, mapping_scope, pair_invocation, MirrorPairing, Pairing, PairingModel};
pub use report::{SweepEntry, SweepSummary, Verdict, VerificationReport};
pub use synth::{synthesize, ProgramText, SynthesizedProgram};

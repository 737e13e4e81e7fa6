//! Memory-model conformance engine
//!
//! Enumerates GPU memory-model synchronization protocols, synthesizes a GLSL
//! program for each, and stress-verifies it on an execution backend:
//!
//! - **Configuration space**: every legal combination of storage classes,
//!   scopes, sync kinds, data kinds and stages ([`config_space`])
//! - **Synthesis**: protocol plans and their GLSL rendering ([`synth`])
//! - **Verification**: repeated dispatch and fail-buffer judging ([`harness`])
//! - **Reference backend**: a CPU emulator that runs the same plans
//!   ([`emulator`])
//!
//! [`args`] and [`sweep`] hold the pieces the `mm-conformance` binary shares
//! with library users.

#![allow(clippy::result_large_err)]

pub mod args;
pub mod sweep;

pub use mm_conformance_core::{
    config_space, domain, errors, harness, pairing, report, synth, AxisSet, ConformanceError,
    DomainConfig, HarnessConfig, SweepSummary, ValidationHarness, Verdict, VerificationReport,
};
pub use mm_emulator as emulator;
pub use mm_types as types;
pub use mm_types::CaseDef;

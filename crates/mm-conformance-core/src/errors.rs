//! Error taxonomy for configuration, synthesis and verification.
//!
//! `ConformanceError` is what callers see. `BackendError` is what an
//! [`ExecutionBackend`](crate::harness::ExecutionBackend) reports; the harness
//! maps it onto the conformance taxonomy (unsupported work becomes a skip,
//! device loss and timeouts are fatal).

use mm_types::Stage;

use crate::config_space::LegalityRule;
use crate::harness::Feature;

/// Outcome errors of the conformance engine.
#[derive(Debug, Clone)]
pub enum ConformanceError {
    /// The configuration violates a legality rule and is never run.
    ConfigurationInvalid {
        /// The first rule that rejected the configuration
        rule: LegalityRule,
    },

    /// The target cannot run this configuration; reported as a skip.
    UnsupportedByTarget {
        /// Missing capability
        feature: Feature,
    },

    /// At least one invocation observed an ordering violation.
    ProtocolViolation {
        /// Number of nonzero fail-buffer slots
        failures: u64,
        /// First violating invocation coordinates (capped)
        sample: Vec<u32>,
    },

    /// The device was lost or stopped responding. Aborts the configuration.
    DeviceLost {
        /// Round in which the loss was observed
        round: u32,
        /// Iteration within the round
        iteration: u32,
        /// Backend-provided description
        reason: String,
    },

    /// The collaborator failed to compile the synthesized program.
    Compilation {
        /// Stage the program targets
        stage: Stage,
        /// Compiler output
        message: String,
    },
}

impl std::fmt::Display for ConformanceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConformanceError::ConfigurationInvalid { rule } => {
                write!(f, "invalid configuration: {}", rule)
            }
            ConformanceError::UnsupportedByTarget { feature } => {
                write!(f, "unsupported by target: {}", feature)
            }
            ConformanceError::ProtocolViolation { failures, sample } => {
                write!(f, "protocol violation: {} failing invocation(s)", failures)?;
                if !sample.is_empty() {
                    let shown: Vec<String> = sample.iter().take(8).map(|c| c.to_string()).collect();
                    write!(f, " (first at {})", shown.join(", "))?;
                }
                Ok(())
            }
            ConformanceError::DeviceLost {
                round,
                iteration,
                reason,
            } => write!(
                f,
                "device lost in round {} iteration {}: {}",
                round, iteration, reason
            ),
            ConformanceError::Compilation { stage, message } => {
                write!(f, "failed to compile {:?} program: {}", stage, message)
            }
        }
    }
}

impl std::error::Error for ConformanceError {}

impl ConformanceError {
    /// Fatal errors abort the configuration; everything else is a verdict.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConformanceError::DeviceLost { .. } | ConformanceError::Compilation { .. }
        )
    }

    /// Unsupported configurations are skipped rather than failed.
    pub fn is_skip(&self) -> bool {
        matches!(self, ConformanceError::UnsupportedByTarget { .. })
    }
}

/// Errors reported by an execution backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend lacks a capability the program needs.
    Unsupported { feature: Feature },
    /// The device was lost after `completed_dispatches` dispatches of the submission.
    DeviceLost {
        completed_dispatches: u64,
        reason: String,
    },
    /// A submission exceeded its wall-clock budget.
    Timeout {
        completed_dispatches: u64,
        elapsed_ms: u64,
    },
    /// Program text was rejected.
    Compilation { message: String },
    /// Anything else.
    Other { message: String },
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Unsupported { feature } => write!(f, "unsupported: {}", feature),
            BackendError::DeviceLost {
                completed_dispatches,
                reason,
            } => write!(
                f,
                "device lost after {} dispatch(es): {}",
                completed_dispatches, reason
            ),
            BackendError::Timeout {
                completed_dispatches,
                elapsed_ms,
            } => write!(
                f,
                "submission timed out after {} ms ({} dispatch(es) completed)",
                elapsed_ms, completed_dispatches
            ),
            BackendError::Compilation { message } => write!(f, "compilation failed: {}", message),
            BackendError::Other { message } => write!(f, "{}", message),
        }
    }
}

impl std::error::Error for BackendError {}

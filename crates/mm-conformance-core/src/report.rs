//! Verification reports and sweep summaries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mm_types::CaseDef;

use crate::errors::ConformanceError;

/// Outcome of one verification run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Verdict {
    /// Every fail-buffer slot stayed zero.
    Pass,
    /// Some invocations recorded a violation.
    Fail {
        total_failures: u64,
        /// Capped list of violating invocation indices.
        failing_invocations: Vec<u32>,
    },
    /// The target cannot run the configuration.
    Skip { reason: String },
}

impl Verdict {
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Pass => "pass",
            Verdict::Fail { .. } => "fail",
            Verdict::Skip { .. } => "skip",
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub path: String,
    pub case: CaseDef,
    /// Digest of the program text that ran.
    pub digest: String,
    pub backend: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub rounds: u32,
    pub iterations_per_round: u32,
    pub invocation_count: u32,
    pub verdict: Verdict,
}

impl VerificationReport {
    /// Turn a failing verdict into [`ConformanceError::ProtocolViolation`].
    pub fn ensure_passed(&self) -> Result<(), ConformanceError> {
        match &self.verdict {
            Verdict::Fail {
                total_failures,
                failing_invocations,
            } => Err(ConformanceError::ProtocolViolation {
                failures: *total_failures,
                sample: failing_invocations.clone(),
            }),
            Verdict::Pass | Verdict::Skip { .. } => Ok(()),
        }
    }
}

/// One configuration's line in a sweep summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepEntry {
    pub path: String,
    pub outcome: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default)]
    pub elapsed_ms: u64,
}

impl SweepEntry {
    pub fn from_report(report: &VerificationReport) -> Self {
        let detail = match &report.verdict {
            Verdict::Pass => None,
            Verdict::Fail { total_failures, .. } => {
                Some(format!("{} failing invocation(s)", total_failures))
            }
            Verdict::Skip { reason } => Some(reason.clone()),
        };
        Self {
            path: report.path.clone(),
            outcome: report.verdict.label().to_string(),
            detail,
            elapsed_ms: report.elapsed_ms,
        }
    }

    pub fn from_error(path: String, err: &ConformanceError) -> Self {
        let outcome = if err.is_fatal() { "fatal" } else { "error" };
        Self {
            path,
            outcome: outcome.to_string(),
            detail: Some(err.to_string()),
            elapsed_ms: 0,
        }
    }
}

/// Aggregate result of a sweep over many configurations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub fatal: u64,
    pub entries: Vec<SweepEntry>,
}

impl SweepSummary {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_ms: 0,
            passed: 0,
            failed: 0,
            skipped: 0,
            fatal: 0,
            entries: Vec::new(),
        }
    }

    pub fn total(&self) -> u64 {
        self.passed + self.failed + self.skipped + self.fatal
    }

    /// A sweep succeeds when nothing failed and nothing was fatal.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.fatal == 0
    }

    pub fn record(&mut self, entry: SweepEntry) {
        match entry.outcome.as_str() {
            "pass" => self.passed += 1,
            "skip" => self.skipped += 1,
            "fail" => self.failed += 1,
            _ => self.fatal += 1,
        }
        self.entries.push(entry);
    }
}

impl Default for SweepSummary {
    fn default() -> Self {
        Self::new()
    }
}

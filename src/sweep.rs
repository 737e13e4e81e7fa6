//! Parallel verification of many configurations on the reference emulator.
//!
//! Each rayon worker owns its own [`ReferenceDevice`] and harness; a single
//! configuration is always verified on one thread.

use std::time::Instant;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use rayon::prelude::*;
use tracing::{debug, info};

use mm_conformance_core::domain::DomainConfig;
use mm_conformance_core::harness::{HarnessConfig, ValidationHarness};
use mm_conformance_core::report::{SweepEntry, SweepSummary};
use mm_emulator::{ReferenceConfig, ReferenceDevice};
use mm_types::CaseDef;

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    pub harness: HarnessConfig,
    pub domain: DomainConfig,
    pub emulator: ReferenceConfig,
    /// Worker threads; `None` uses rayon's default.
    pub threads: Option<usize>,
}

/// Verify every case and collect the outcomes, ordered by path.
pub fn run_sweep(cases: &[CaseDef], options: &SweepOptions) -> Result<SweepSummary> {
    let start = Instant::now();
    let summary = Mutex::new(SweepSummary::new());
    info!(
        run_id = %summary.lock().run_id,
        cases = cases.len(),
        "starting sweep"
    );

    let pool = match options.threads {
        Some(threads) => rayon::ThreadPoolBuilder::new().num_threads(threads),
        None => rayon::ThreadPoolBuilder::new(),
    }
    .build()
    .context("Failed to build sweep thread pool")?;

    pool.install(|| {
        cases.par_iter().for_each_init(
            || {
                ValidationHarness::new(
                    ReferenceDevice::new(options.emulator.clone()),
                    options.harness.clone(),
                )
            },
            |harness, case| {
                let entry = verify_one(harness, case, &options.domain);
                debug!(case = %entry.path, outcome = %entry.outcome, "sweep entry");
                summary.lock().record(entry);
            },
        )
    });

    let mut summary = summary.into_inner();
    summary.entries.sort_by(|a, b| a.path.cmp(&b.path));
    summary.elapsed_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);
    info!(
        run_id = %summary.run_id,
        passed = summary.passed,
        failed = summary.failed,
        skipped = summary.skipped,
        fatal = summary.fatal,
        elapsed_ms = summary.elapsed_ms,
        "sweep finished"
    );
    Ok(summary)
}

fn verify_one(
    harness: &mut ValidationHarness<ReferenceDevice>,
    case: &CaseDef,
    domain: &DomainConfig,
) -> SweepEntry {
    match harness.verify(case, domain) {
        Ok(report) => SweepEntry::from_report(&report),
        Err(err) => SweepEntry::from_error(case.path(), &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm_conformance_core::config_space::{enumerate, AxisSet};
    use mm_emulator::Capabilities;
    use mm_types::Family;

    fn quick_options() -> SweepOptions {
        SweepOptions {
            harness: HarnessConfig::default()
                .with_rounds(1)
                .with_iterations_per_round(2),
            domain: DomainConfig::default().with_dim(4).with_workgroups_per_dim(2),
            threads: Some(2),
            ..Default::default()
        }
    }

    #[test]
    fn test_sweep_counts_every_case() {
        let cases: Vec<CaseDef> = enumerate(&AxisSet::default().for_family(Family::WriteAfterRead))
            .step_by(29)
            .collect();
        let summary = run_sweep(&cases, &quick_options()).unwrap();
        assert_eq!(summary.total(), cases.len() as u64);
        assert!(summary.is_success());
        assert!(summary
            .entries
            .windows(2)
            .all(|pair| pair[0].path <= pair[1].path));
    }

    #[test]
    fn test_sweep_reports_skips() {
        let options = SweepOptions {
            emulator: ReferenceConfig::default().with_capabilities(Capabilities::legacy_only()),
            ..quick_options()
        };
        let summary = run_sweep(&[CaseDef::default()], &options).unwrap();
        assert_eq!(summary.skipped, 1);
        assert!(summary.is_success());
    }

    #[test]
    fn test_invalid_case_is_fatal_entry() {
        let case = CaseDef {
            atomic_rmw: true,
            ..Default::default()
        };
        let summary = run_sweep(&[case], &quick_options()).unwrap();
        assert_eq!(summary.fatal, 1);
        assert!(!summary.is_success());
        assert!(summary.entries[0].detail.is_some());
    }
}

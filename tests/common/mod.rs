#![allow(dead_code)]
//! Shared test utilities for integration tests.
//!
//! Harness constructors for the reference emulator and a few verdict
//! assertions used across the end-to-end and CLI suites.

use mm_conformance::domain::DomainConfig;
use mm_conformance::emulator::{ReferenceConfig, ReferenceDevice};
use mm_conformance::{HarnessConfig, ValidationHarness, Verdict, VerificationReport};

/// Canonical case paths used by more than one suite.
pub const MP_DEVICE_BUFFER: &str =
    "message_passing/coherent_fence_fence_payload_local_buffer_guard_local_buffer_scope_device_comp";
pub const WAR_WORKGROUP_BARRIER: &str =
    "write_after_read/coherent_control_barrier_payload_workgroup_scope_workgroup_comp";

/// Harness with the default 4 × 50 dispatch schedule.
pub fn full_harness(config: ReferenceConfig) -> ValidationHarness<ReferenceDevice> {
    ValidationHarness::new(ReferenceDevice::new(config), HarnessConfig::default())
}

/// Harness with a short schedule for fault-injection tests.
pub fn quick_harness(config: ReferenceConfig) -> ValidationHarness<ReferenceDevice> {
    ValidationHarness::new(
        ReferenceDevice::new(config),
        HarnessConfig::default()
            .with_rounds(2)
            .with_iterations_per_round(4),
    )
}

/// A 16 × 16 domain: four workgroups of 8 × 8.
pub fn small_domain() -> DomainConfig {
    DomainConfig::default().with_dim(8).with_workgroups_per_dim(2)
}

pub fn assert_pass(report: &VerificationReport) {
    assert_eq!(
        report.verdict,
        Verdict::Pass,
        "{} did not pass: {:?}",
        report.path,
        report.verdict
    );
}

/// Asserts a failing verdict and returns the failure count.
pub fn assert_fail(report: &VerificationReport) -> u64 {
    match &report.verdict {
        Verdict::Fail {
            total_failures,
            failing_invocations,
        } => {
            assert!(*total_failures > 0);
            assert!(!failing_invocations.is_empty());
            *total_failures
        }
        other => panic!("{} expected to fail, got {:?}", report.path, other),
    }
}

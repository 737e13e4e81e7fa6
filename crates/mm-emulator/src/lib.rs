//! Reference execution backend.
//!
//! [`ReferenceDevice`] implements [`ExecutionBackend`] on the CPU. It
//! interprets the same protocol plan the GLSL renderer prints, with
//! sequentially consistent memory and a seeded scheduler, so that every
//! correctly synchronized configuration must pass on it. Faults can be
//! injected through [`ReferenceConfig`] to check that the harness notices
//! broken pairings, lost stores, device loss and hangs.
//!
//! ```ignore
//! use mm_conformance_core::{DomainConfig, HarnessConfig, ValidationHarness};
//! use mm_emulator::{ReferenceConfig, ReferenceDevice};
//!
//! let device = ReferenceDevice::new(ReferenceConfig::from_env());
//! let mut harness = ValidationHarness::new(device, HarnessConfig::default());
//! let report = harness.verify(&case, &DomainConfig::default())?;
//! ```
//!
//! [`ExecutionBackend`]: mm_conformance_core::harness::ExecutionBackend

pub mod config;
pub mod device;

pub use config::{Capabilities, Faults, OffByOnePairing, ReferenceConfig};
pub use device::{CompiledProgram, ReferenceDevice, BACKEND_NAME};

//! Reference device configuration: capabilities, limits and injected faults.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use mm_conformance_core::domain::{InvocationDomain, InvocationId};
use mm_conformance_core::env_utils::env_var_or;
use mm_conformance_core::harness::Feature;
use mm_conformance_core::pairing::{Coordinates, Pairing, PairingModel};
use mm_types::Scope;

/// Default scheduling seed.
pub const DEFAULT_SEED: u64 = 0x6d6d_5eed;

/// Default subgroup width.
pub const DEFAULT_SUBGROUP_SIZE: u32 = 32;

/// Default `maxComputeWorkGroupInvocations`.
pub const DEFAULT_MAX_WORKGROUP_INVOCATIONS: u32 = 1024;

/// Which optional features the reference device reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    pub memory_model: bool,
    pub memory_model_device_scope: bool,
    pub subgroup_ops: bool,
    pub int64_atomics: bool,
    pub float64: bool,
    pub physical_storage_buffer: bool,
    pub non_local_memory: bool,
    pub vertex_stores_and_atomics: bool,
    pub fragment_stores_and_atomics: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::all()
    }
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            memory_model: true,
            memory_model_device_scope: true,
            subgroup_ops: true,
            int64_atomics: true,
            float64: true,
            physical_storage_buffer: true,
            non_local_memory: true,
            vertex_stores_and_atomics: true,
            fragment_stores_and_atomics: true,
        }
    }

    /// A device that only runs legacy-model 32-bit compute programs.
    pub fn legacy_only() -> Self {
        Self {
            memory_model: false,
            memory_model_device_scope: false,
            subgroup_ops: true,
            int64_atomics: false,
            float64: false,
            physical_storage_buffer: false,
            non_local_memory: true,
            vertex_stores_and_atomics: false,
            fragment_stores_and_atomics: false,
        }
    }

    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::MemoryModel => self.memory_model,
            Feature::MemoryModelDeviceScope => self.memory_model_device_scope,
            Feature::SubgroupOps => self.subgroup_ops,
            Feature::Int64Atomics => self.int64_atomics,
            Feature::Float64 => self.float64,
            Feature::PhysicalStorageBuffer => self.physical_storage_buffer,
            Feature::NonLocalMemory => self.non_local_memory,
            Feature::VertexStoresAndAtomics => self.vertex_stores_and_atomics,
            Feature::FragmentStoresAndAtomics => self.fragment_stores_and_atomics,
        }
    }

    pub fn without(mut self, feature: Feature) -> Self {
        let flag = match feature {
            Feature::MemoryModel => &mut self.memory_model,
            Feature::MemoryModelDeviceScope => &mut self.memory_model_device_scope,
            Feature::SubgroupOps => &mut self.subgroup_ops,
            Feature::Int64Atomics => &mut self.int64_atomics,
            Feature::Float64 => &mut self.float64,
            Feature::PhysicalStorageBuffer => &mut self.physical_storage_buffer,
            Feature::NonLocalMemory => &mut self.non_local_memory,
            Feature::VertexStoresAndAtomics => &mut self.vertex_stores_and_atomics,
            Feature::FragmentStoresAndAtomics => &mut self.fragment_stores_and_atomics,
        };
        *flag = false;
        self
    }
}

/// Deliberate misbehaviour, for testing the harness itself.
#[derive(Debug, Clone, Default)]
pub struct Faults {
    /// Replaces the mirror pairing the program was synthesized for.
    pub pairing: Option<Arc<dyn PairingModel>>,
    /// Payload stores only land when the dispatch completes, as if the
    /// release never made them available.
    pub defer_payload_stores: bool,
    /// The device is lost once this many dispatches have executed.
    pub lose_device_after: Option<u64>,
    /// Every dispatch takes at least this long.
    pub stall: Option<Duration>,
}

impl Faults {
    pub fn is_empty(&self) -> bool {
        self.pairing.is_none()
            && !self.defer_payload_stores
            && self.lose_device_after.is_none()
            && self.stall.is_none()
    }
}

/// Partner is the next invocation along x (wrapping), laid out row-major.
///
/// The mapping is total but not an involution, so the partner an invocation
/// reads from is not the one that synchronizes with it. Only meaningful with
/// buffer or image storage.
#[derive(Debug, Clone, Copy, Default)]
pub struct OffByOnePairing;

impl PairingModel for OffByOnePairing {
    fn pair(
        &self,
        domain: &InvocationDomain,
        _mapping: Scope,
        _subgroup_size: u32,
        id: InvocationId,
    ) -> Pairing {
        let global = domain.global_position(id);
        let partner = [(global[0] + 1) % domain.extent(), global[1]];
        let own = Coordinates::row_major(domain, global);
        let partner = Coordinates::row_major(domain, partner);
        if own.buffer == partner.buffer {
            Pairing::Singleton { own }
        } else {
            Pairing::Paired { own, partner }
        }
    }
}

/// Settings of a [`ReferenceDevice`](crate::ReferenceDevice).
#[derive(Debug, Clone)]
pub struct ReferenceConfig {
    pub seed: u64,
    /// Rounded down to a power of two by the device.
    pub subgroup_size: u32,
    pub max_workgroup_invocations: u32,
    pub capabilities: Capabilities,
    pub faults: Faults,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            subgroup_size: DEFAULT_SUBGROUP_SIZE,
            max_workgroup_invocations: DEFAULT_MAX_WORKGROUP_INVOCATIONS,
            capabilities: Capabilities::default(),
            faults: Faults::default(),
        }
    }
}

impl ReferenceConfig {
    /// Defaults with `MM_EMULATOR_SEED` and `MM_EMULATOR_SUBGROUP_SIZE` applied.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            seed: env_var_or("MM_EMULATOR_SEED", defaults.seed),
            subgroup_size: env_var_or("MM_EMULATOR_SUBGROUP_SIZE", defaults.subgroup_size),
            ..defaults
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_subgroup_size(mut self, size: u32) -> Self {
        self.subgroup_size = size;
        self
    }

    pub fn with_max_workgroup_invocations(mut self, max: u32) -> Self {
        self.max_workgroup_invocations = max;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_pairing(mut self, pairing: Arc<dyn PairingModel>) -> Self {
        self.faults.pairing = Some(pairing);
        self
    }

    pub fn with_deferred_payload_stores(mut self) -> Self {
        self.faults.defer_payload_stores = true;
        self
    }

    pub fn with_device_loss_after(mut self, dispatches: u64) -> Self {
        self.faults.lose_device_after = Some(dispatches);
        self
    }

    pub fn with_stall(mut self, stall: Duration) -> Self {
        self.faults.stall = Some(stall);
        self
    }

    /// Largest power of two not above the configured subgroup size.
    pub fn effective_subgroup_size(&self) -> u32 {
        match self.subgroup_size {
            0 => 1,
            size => 1 << (31 - size.leading_zeros()),
        }
    }
}

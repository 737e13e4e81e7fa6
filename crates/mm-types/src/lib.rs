//! Shared types for the memory-model conformance workspace.
//!
//! Every synchronization-protocol configuration is a [`CaseDef`]: an immutable
//! value assembled from the axis enums in this crate. Legality rules live in
//! `mm-conformance-core`; this crate only knows how to name, print and parse
//! configurations so that every other crate agrees on test identity.

use serde::{Deserialize, Serialize};

mod name;

pub use name::NameError;

/// Which ordering guarantee a configuration exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestKind {
    /// A guarded write must be visible to the partner once the guard is observed.
    MessagePassing,
    /// A write must not become visible to a partner that has not synchronized yet.
    WriteAfterRead,
}

impl TestKind {
    pub const ALL: [TestKind; 2] = [TestKind::MessagePassing, TestKind::WriteAfterRead];
}

/// Backing storage of the payload or guard variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageClass {
    Buffer,
    Image,
    Workgroup,
    PhysicalBuffer,
}

impl StorageClass {
    pub const ALL: [StorageClass; 4] = [
        StorageClass::Buffer,
        StorageClass::Image,
        StorageClass::Workgroup,
        StorageClass::PhysicalBuffer,
    ];

    /// Token used in registration names.
    pub fn token(self) -> &'static str {
        match self {
            StorageClass::Buffer => "buffer",
            StorageClass::Image => "image",
            StorageClass::Workgroup => "workgroup",
            StorageClass::PhysicalBuffer => "physbuffer",
        }
    }
}

/// Set of invocations a synchronization operation applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    Device,
    QueueFamily,
    Workgroup,
    Subgroup,
}

impl Scope {
    pub const ALL: [Scope; 4] = [
        Scope::Device,
        Scope::QueueFamily,
        Scope::Workgroup,
        Scope::Subgroup,
    ];

    pub fn token(self) -> &'static str {
        match self {
            Scope::Device => "device",
            Scope::QueueFamily => "queuefamily",
            Scope::Workgroup => "workgroup",
            Scope::Subgroup => "subgroup",
        }
    }
}

/// How the release and acquire sides are expressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncKind {
    /// Release fence + atomic guard store, atomic guard load + acquire fence.
    FenceFence,
    /// Release fence on the producer, acquiring atomic on the consumer.
    FenceAtomic,
    /// Releasing atomic on the producer, acquire fence on the consumer.
    AtomicFence,
    /// Releasing and acquiring atomics, no fences.
    AtomicAtomic,
    /// A single control barrier with acquire-release semantics.
    ControlBarrier,
    /// Release memory barrier, bare control barrier, acquire memory barrier.
    ControlAndMemoryBarrier,
}

impl SyncKind {
    pub const ALL: [SyncKind; 6] = [
        SyncKind::FenceFence,
        SyncKind::FenceAtomic,
        SyncKind::AtomicFence,
        SyncKind::AtomicAtomic,
        SyncKind::ControlBarrier,
        SyncKind::ControlAndMemoryBarrier,
    ];

    pub fn token(self) -> &'static str {
        match self {
            SyncKind::FenceFence => "fence_fence",
            SyncKind::FenceAtomic => "fence_atomic",
            SyncKind::AtomicFence => "atomic_fence",
            SyncKind::AtomicAtomic => "atomic_atomic",
            SyncKind::ControlBarrier => "control_barrier",
            SyncKind::ControlAndMemoryBarrier => "control_and_memory_barrier",
        }
    }

    /// Barrier variants synchronize without a guard variable.
    pub fn is_barrier(self) -> bool {
        matches!(
            self,
            SyncKind::ControlBarrier | SyncKind::ControlAndMemoryBarrier
        )
    }
}

/// Execution stage the synthesized program runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    Compute,
    Vertex,
    Fragment,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Compute, Stage::Vertex, Stage::Fragment];

    pub fn token(self) -> &'static str {
        match self {
            Stage::Compute => "comp",
            Stage::Vertex => "vert",
            Stage::Fragment => "frag",
        }
    }
}

/// Element type of the payload variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataKind {
    U32,
    U64,
    F32,
    F64,
}

impl DataKind {
    pub const ALL: [DataKind; 4] = [DataKind::U32, DataKind::U64, DataKind::F32, DataKind::F64];

    pub fn is_64bit(self) -> bool {
        matches!(self, DataKind::U64 | DataKind::F64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, DataKind::F32 | DataKind::F64)
    }

    /// Name suffix; the 32-bit unsigned default has none.
    pub fn suffix(self) -> &'static str {
        match self {
            DataKind::U32 => "",
            DataKind::U64 => "_u64",
            DataKind::F32 => "_f32",
            DataKind::F64 => "_f64",
        }
    }
}

/// Registration group a configuration belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Family {
    MessagePassing,
    WriteAfterRead,
    Transitive,
}

impl Family {
    pub fn group_name(self) -> &'static str {
        match self {
            Family::MessagePassing => "message_passing",
            Family::WriteAfterRead => "write_after_read",
            Family::Transitive => "transitive",
        }
    }
}

/// One protocol configuration: the unit of test identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaseDef {
    pub payload_mem_local: bool,
    pub guard_mem_local: bool,
    pub coherent: bool,
    pub legacy_model: bool,
    pub atomic_rmw: bool,
    pub test_kind: TestKind,
    pub payload_storage: StorageClass,
    pub guard_storage: StorageClass,
    pub scope: Scope,
    pub sync_kind: SyncKind,
    pub stage: Stage,
    pub data_kind: DataKind,
    pub transitive: bool,
    pub transitive_vis_at_leader: bool,
}

impl Default for CaseDef {
    fn default() -> Self {
        Self {
            payload_mem_local: true,
            guard_mem_local: true,
            coherent: true,
            legacy_model: false,
            atomic_rmw: false,
            test_kind: TestKind::MessagePassing,
            payload_storage: StorageClass::Buffer,
            guard_storage: StorageClass::Buffer,
            scope: Scope::Device,
            sync_kind: SyncKind::FenceFence,
            stage: Stage::Compute,
            data_kind: DataKind::U32,
            transitive: false,
            transitive_vis_at_leader: false,
        }
    }
}

impl CaseDef {
    /// Whether the configuration declares a guard variable at all.
    pub fn has_guard(&self) -> bool {
        !self.sync_kind.is_barrier()
    }

    pub fn family(&self) -> Family {
        if self.transitive {
            Family::Transitive
        } else {
            match self.test_kind {
                TestKind::MessagePassing => Family::MessagePassing,
                TestKind::WriteAfterRead => Family::WriteAfterRead,
            }
        }
    }

    pub fn group(&self) -> &'static str {
        self.family().group_name()
    }

    /// Registration name within the group, e.g.
    /// `noncoherent_atomic_atomic_payload_local_buffer_guard_local_buffer_scope_device_comp`.
    pub fn name(&self) -> String {
        name::format_name(self)
    }

    /// `group/name`, the path used by the CLI and in reports.
    pub fn path(&self) -> String {
        format!("{}/{}", self.group(), self.name())
    }

    /// Parse a `group/name` path produced by [`CaseDef::path`].
    pub fn from_path(path: &str) -> Result<Self, NameError> {
        name::parse_path(path)
    }
}

impl std::fmt::Display for CaseDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path())
    }
}

impl std::str::FromStr for CaseDef {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_path(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_case_is_message_passing_buffer() {
        let case = CaseDef::default();
        assert_eq!(case.family(), Family::MessagePassing);
        assert!(case.has_guard());
        assert_eq!(case.payload_storage, StorageClass::Buffer);
    }

    #[test]
    fn test_barrier_kinds_have_no_guard() {
        let case = CaseDef {
            sync_kind: SyncKind::ControlBarrier,
            ..Default::default()
        };
        assert!(!case.has_guard());
        assert!(SyncKind::ControlAndMemoryBarrier.is_barrier());
        assert!(!SyncKind::AtomicAtomic.is_barrier());
    }

    #[test]
    fn test_transitive_overrides_test_kind_family() {
        let case = CaseDef {
            transitive: true,
            ..Default::default()
        };
        assert_eq!(case.group(), "transitive");
    }

    #[test]
    fn test_case_serialization() {
        let case = CaseDef {
            data_kind: DataKind::F64,
            ..Default::default()
        };
        let json = serde_json::to_string(&case).unwrap();
        assert!(json.contains("\"data_kind\":\"F64\""));
        let back: CaseDef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, case);
    }
}

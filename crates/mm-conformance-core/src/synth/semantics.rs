//! Placement of storage-class and availability/visibility semantics.
//!
//! Every rule deciding which bits go on which side of a producer/consumer
//! pair lives here, independent of how the program text is formatted.

use serde::{Deserialize, Serialize};

use mm_types::{CaseDef, StorageClass, SyncKind, TestKind};

/// A set of storage-class semantics bits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StorageSemantics(u8);

impl StorageSemantics {
    pub const NONE: StorageSemantics = StorageSemantics(0);
    pub const BUFFER: StorageSemantics = StorageSemantics(1);
    pub const IMAGE: StorageSemantics = StorageSemantics(2);
    pub const SHARED: StorageSemantics = StorageSemantics(4);

    /// The bit a storage class contributes; physical buffers are buffer memory.
    pub fn of(storage: StorageClass) -> Self {
        match storage {
            StorageClass::Buffer | StorageClass::PhysicalBuffer => Self::BUFFER,
            StorageClass::Image => Self::IMAGE,
            StorageClass::Workgroup => Self::SHARED,
        }
    }

    pub fn contains(self, other: StorageSemantics) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn glsl(self) -> String {
        if self.is_empty() {
            return "0".to_string();
        }
        let mut parts = Vec::new();
        if self.contains(Self::BUFFER) {
            parts.push("gl_StorageSemanticsBuffer");
        }
        if self.contains(Self::IMAGE) {
            parts.push("gl_StorageSemanticsImage");
        }
        if self.contains(Self::SHARED) {
            parts.push("gl_StorageSemanticsShared");
        }
        parts.join(" | ")
    }
}

impl std::ops::BitOr for StorageSemantics {
    type Output = StorageSemantics;

    fn bitor(self, rhs: StorageSemantics) -> StorageSemantics {
        StorageSemantics(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for StorageSemantics {
    fn bitor_assign(&mut self, rhs: StorageSemantics) {
        self.0 |= rhs.0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ordering {
    Release,
    Acquire,
    AcquireRelease,
}

/// Ordering plus availability/visibility operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemorySemantics {
    pub ordering: Ordering,
    pub make_available: bool,
    pub make_visible: bool,
}

impl MemorySemantics {
    pub fn release(make_available: bool) -> Self {
        Self {
            ordering: Ordering::Release,
            make_available,
            make_visible: false,
        }
    }

    pub fn acquire(make_visible: bool) -> Self {
        Self {
            ordering: Ordering::Acquire,
            make_available: false,
            make_visible,
        }
    }

    pub fn acquire_release(explicit: bool) -> Self {
        Self {
            ordering: Ordering::AcquireRelease,
            make_available: explicit,
            make_visible: explicit,
        }
    }

    pub fn glsl(self) -> String {
        let mut text = match self.ordering {
            Ordering::Release => "gl_SemanticsRelease",
            Ordering::Acquire => "gl_SemanticsAcquire",
            Ordering::AcquireRelease => "gl_SemanticsAcquireRelease",
        }
        .to_string();
        if self.make_available {
            text.push_str(" | gl_SemanticsMakeAvailable");
        }
        if self.make_visible {
            text.push_str(" | gl_SemanticsMakeVisible");
        }
        text
    }
}

/// Which operation carries the semantics on one side of the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Carrier {
    /// A standalone memory barrier; the guard atomic is relaxed.
    Fence,
    /// The guard atomic itself.
    Atomic,
}

/// Semantics for both sides of one configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSemantics {
    pub release_storage: StorageSemantics,
    pub acquire_storage: StorageSemantics,
    pub release: MemorySemantics,
    pub acquire: MemorySemantics,
    pub acquire_release: MemorySemantics,
    pub release_carrier: Carrier,
    pub acquire_carrier: Carrier,
}

/// Whether explicit availability/visibility operations are attached.
///
/// Coherent variables rely on the qualifier. Write-after-read tests never
/// read data published through the guard, so they carry none either.
pub fn explicit_availability(case: &CaseDef) -> bool {
    !case.coherent && (case.transitive || case.test_kind == TestKind::MessagePassing)
}

/// Compose the semantics for `case`.
///
/// Both sides always carry the payload's storage bit. The release side adds
/// the guard's bit only when a fence carries it (`FenceFence`, `FenceAtomic`),
/// the acquire side only for `FenceFence` and `AtomicFence`. Barrier variants
/// have no guard, so only the payload bit appears.
pub fn compose(case: &CaseDef) -> SyncSemantics {
    let payload = StorageSemantics::of(case.payload_storage);
    let guard = if case.has_guard() {
        StorageSemantics::of(case.guard_storage)
    } else {
        StorageSemantics::NONE
    };

    let release_carrier = match case.sync_kind {
        SyncKind::FenceFence | SyncKind::FenceAtomic => Carrier::Fence,
        _ => Carrier::Atomic,
    };
    let acquire_carrier = match case.sync_kind {
        SyncKind::FenceFence | SyncKind::AtomicFence => Carrier::Fence,
        _ => Carrier::Atomic,
    };

    let mut release_storage = payload;
    if release_carrier == Carrier::Fence {
        release_storage |= guard;
    }
    let mut acquire_storage = payload;
    if acquire_carrier == Carrier::Fence {
        acquire_storage |= guard;
    }

    let explicit = explicit_availability(case);
    SyncSemantics {
        release_storage,
        acquire_storage,
        release: MemorySemantics::release(explicit),
        acquire: MemorySemantics::acquire(explicit),
        acquire_release: MemorySemantics::acquire_release(explicit),
        release_carrier,
        acquire_carrier,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mm_types::Scope;

    #[test]
    fn test_fence_fence_puts_guard_bit_on_both_sides() {
        let case = CaseDef {
            guard_storage: StorageClass::Image,
            ..Default::default()
        };
        let sem = compose(&case);
        assert_eq!(
            sem.release_storage,
            StorageSemantics::BUFFER | StorageSemantics::IMAGE
        );
        assert_eq!(sem.acquire_storage, sem.release_storage);
        assert_eq!(sem.release_carrier, Carrier::Fence);
    }

    #[test]
    fn test_atomic_sides_carry_only_payload_bit() {
        let base = CaseDef {
            payload_storage: StorageClass::Workgroup,
            guard_storage: StorageClass::Image,
            ..Default::default()
        };
        let fa = compose(&CaseDef {
            sync_kind: SyncKind::FenceAtomic,
            ..base
        });
        assert_eq!(
            fa.release_storage,
            StorageSemantics::SHARED | StorageSemantics::IMAGE
        );
        assert_eq!(fa.acquire_storage, StorageSemantics::SHARED);

        let af = compose(&CaseDef {
            sync_kind: SyncKind::AtomicFence,
            ..base
        });
        assert_eq!(af.release_storage, StorageSemantics::SHARED);
        assert_eq!(
            af.acquire_storage,
            StorageSemantics::SHARED | StorageSemantics::IMAGE
        );
    }

    #[test]
    fn test_barrier_has_no_guard_bit() {
        let case = CaseDef {
            sync_kind: SyncKind::ControlBarrier,
            scope: Scope::Workgroup,
            payload_storage: StorageClass::Image,
            ..Default::default()
        };
        let sem = compose(&case);
        assert_eq!(sem.release_storage, StorageSemantics::IMAGE);
        assert_eq!(sem.acquire_storage, StorageSemantics::IMAGE);
    }

    #[test]
    fn test_availability_only_when_noncoherent_message_passing() {
        let mp = compose(&CaseDef {
            coherent: false,
            ..Default::default()
        });
        assert!(mp.release.make_available);
        assert!(mp.acquire.make_visible);
        assert_eq!(
            mp.acquire_release.glsl(),
            "gl_SemanticsAcquireRelease | gl_SemanticsMakeAvailable | gl_SemanticsMakeVisible"
        );

        let war = compose(&CaseDef {
            coherent: false,
            test_kind: TestKind::WriteAfterRead,
            ..Default::default()
        });
        assert!(!war.release.make_available);

        let coherent = compose(&CaseDef::default());
        assert_eq!(coherent.release.glsl(), "gl_SemanticsRelease");
    }

    #[test]
    fn test_storage_glsl_rendering() {
        assert_eq!(StorageSemantics::NONE.glsl(), "0");
        assert_eq!(
            (StorageSemantics::SHARED | StorageSemantics::BUFFER).glsl(),
            "gl_StorageSemanticsBuffer | gl_StorageSemanticsShared"
        );
        assert_eq!(
            StorageSemantics::of(StorageClass::PhysicalBuffer),
            StorageSemantics::BUFFER
        );
    }
}

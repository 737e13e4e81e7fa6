//! Enumeration and legality filtering of protocol configurations.
//!
//! The space is the Cartesian product of the axes in an [`AxisSet`]. It is
//! walked lazily with a mixed-radix counter, so a [`Cases`] iterator holds no
//! more than a cursor and can be cloned to restart from any point. Every
//! candidate is passed through [`first_violation`], which checks the rules in
//! a fixed, cheapest-first order.

use serde::{Deserialize, Serialize};

use mm_types::{CaseDef, DataKind, Family, Scope, Stage, StorageClass, SyncKind, TestKind};

use crate::errors::ConformanceError;

/// The legality rule a configuration violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LegalityRule {
    // Stage / storage
    WorkgroupStorageRequiresCompute,
    WorkgroupStorageIsLocal,
    WorkgroupScopeRequiresCompute,
    // Scope / barrier
    BarrierRequiresComputeWorkgroupScope,
    BarrierGuardIsCanonical,
    // Data type / storage
    WideDataWithImage,
    WideDataRequiresAtomicAtomic,
    // RMW / sync kind
    RmwRequiresAtomicAtomic,
    // Legacy model
    LegacyRequiresCoherent,
    LegacySyncKind,
    LegacyWideData,
    LegacyQueueFamilyScope,
    LegacyPhysicalBuffer,
    LegacyTransitive,
    // Transitive family
    TransitiveRequiresMessagePassing,
    TransitiveRequiresCompute,
    TransitiveScope,
    TransitiveSyncKind,
    TransitiveWorkgroupStorage,
    TransitiveRequiresNoncoherent,
    VisAtLeaderRequiresTransitive,
    // Invocation domain
    EmptyDomain,
    DomainTooLarge,
    LeaderOutsideWorkgroup,
    // Harness schedule
    EmptySchedule,
}

impl std::fmt::Display for LegalityRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            LegalityRule::WorkgroupStorageRequiresCompute => {
                "workgroup storage is only available to compute programs"
            }
            LegalityRule::WorkgroupStorageIsLocal => "workgroup storage is always device-local",
            LegalityRule::WorkgroupScopeRequiresCompute => {
                "workgroup scope is only available to compute programs"
            }
            LegalityRule::BarrierRequiresComputeWorkgroupScope => {
                "control barriers require a compute program at workgroup scope"
            }
            LegalityRule::BarrierGuardIsCanonical => {
                "barrier variants have no guard; the guard axis must stay at local buffer"
            }
            LegalityRule::WideDataWithImage => "64-bit data cannot live in image storage",
            LegalityRule::WideDataRequiresAtomicAtomic => {
                "64-bit data is only exercised with atomic_atomic synchronization"
            }
            LegalityRule::RmwRequiresAtomicAtomic => "RMW guards require atomic_atomic",
            LegalityRule::LegacyRequiresCoherent => "legacy configurations must be coherent",
            LegalityRule::LegacySyncKind => {
                "legacy configurations only use fence_fence or control barriers"
            }
            LegalityRule::LegacyWideData => "legacy configurations only use 32-bit data",
            LegalityRule::LegacyQueueFamilyScope => "legacy configurations have no queue-family scope",
            LegalityRule::LegacyPhysicalBuffer => "legacy configurations have no physical buffers",
            LegalityRule::LegacyTransitive => "legacy configurations have no transitive variants",
            LegalityRule::TransitiveRequiresMessagePassing => {
                "transitive variants are message-passing tests"
            }
            LegalityRule::TransitiveRequiresCompute => "transitive variants require compute",
            LegalityRule::TransitiveScope => {
                "transitive variants release at device or queue-family scope"
            }
            LegalityRule::TransitiveSyncKind => "transitive variants need a guard variable",
            LegalityRule::TransitiveWorkgroupStorage => {
                "transitive variants cannot use workgroup storage"
            }
            LegalityRule::TransitiveRequiresNoncoherent => {
                "transitive variants exercise explicit availability and visibility"
            }
            LegalityRule::VisAtLeaderRequiresTransitive => "vis_leader requires a transitive variant",
            LegalityRule::EmptyDomain => "the invocation domain is empty",
            LegalityRule::DomainTooLarge => {
                "the invocation domain has more than u32::MAX invocations"
            }
            LegalityRule::LeaderOutsideWorkgroup => "the leader lies outside the workgroup tile",
            LegalityRule::EmptySchedule => "at least one round of one dispatch is required",
        };
        f.write_str(text)
    }
}

fn uses_storage(case: &CaseDef, storage: StorageClass) -> bool {
    case.payload_storage == storage || (case.has_guard() && case.guard_storage == storage)
}

/// Return the first rule `case` violates, checking in the fixed order
/// stage/storage, scope/barrier, data/storage, RMW, legacy, transitive.
pub fn first_violation(case: &CaseDef) -> Option<LegalityRule> {
    use LegalityRule::*;

    let compute = case.stage == Stage::Compute;
    let barrier = case.sync_kind.is_barrier();

    if uses_storage(case, StorageClass::Workgroup) && !compute {
        return Some(WorkgroupStorageRequiresCompute);
    }
    if (case.payload_storage == StorageClass::Workgroup && !case.payload_mem_local)
        || (case.guard_storage == StorageClass::Workgroup && !case.guard_mem_local)
    {
        return Some(WorkgroupStorageIsLocal);
    }
    if case.scope == Scope::Workgroup && !compute {
        return Some(WorkgroupScopeRequiresCompute);
    }

    if barrier && (!compute || case.scope != Scope::Workgroup) {
        return Some(BarrierRequiresComputeWorkgroupScope);
    }
    if barrier && (case.guard_storage != StorageClass::Buffer || !case.guard_mem_local) {
        return Some(BarrierGuardIsCanonical);
    }

    if case.data_kind.is_64bit() {
        if uses_storage(case, StorageClass::Image) {
            return Some(WideDataWithImage);
        }
        if case.sync_kind != SyncKind::AtomicAtomic {
            return Some(WideDataRequiresAtomicAtomic);
        }
    }

    if case.atomic_rmw && case.sync_kind != SyncKind::AtomicAtomic {
        return Some(RmwRequiresAtomicAtomic);
    }

    if case.legacy_model {
        if !case.coherent {
            return Some(LegacyRequiresCoherent);
        }
        if !(case.sync_kind == SyncKind::FenceFence || barrier) {
            return Some(LegacySyncKind);
        }
        if case.data_kind.is_64bit() {
            return Some(LegacyWideData);
        }
        if case.scope == Scope::QueueFamily {
            return Some(LegacyQueueFamilyScope);
        }
        if uses_storage(case, StorageClass::PhysicalBuffer) {
            return Some(LegacyPhysicalBuffer);
        }
        if case.transitive {
            return Some(LegacyTransitive);
        }
    }

    if case.transitive {
        if case.test_kind != TestKind::MessagePassing {
            return Some(TransitiveRequiresMessagePassing);
        }
        if !compute {
            return Some(TransitiveRequiresCompute);
        }
        if !matches!(case.scope, Scope::Device | Scope::QueueFamily) {
            return Some(TransitiveScope);
        }
        if barrier {
            return Some(TransitiveSyncKind);
        }
        if uses_storage(case, StorageClass::Workgroup) {
            return Some(TransitiveWorkgroupStorage);
        }
        if case.coherent {
            return Some(TransitiveRequiresNoncoherent);
        }
    } else if case.transitive_vis_at_leader {
        return Some(VisAtLeaderRequiresTransitive);
    }

    None
}

/// Reject an illegal configuration.
pub fn validate(case: &CaseDef) -> Result<(), ConformanceError> {
    match first_violation(case) {
        Some(rule) => Err(ConformanceError::ConfigurationInvalid { rule }),
        None => Ok(()),
    }
}

/// How (and whether) a configuration uses the two-hop protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransitiveMode {
    Off,
    VisAtDestination,
    VisAtLeader,
}

impl TransitiveMode {
    pub const ALL: [TransitiveMode; 3] = [
        TransitiveMode::Off,
        TransitiveMode::VisAtDestination,
        TransitiveMode::VisAtLeader,
    ];

    fn apply(self, case: &mut CaseDef) {
        case.transitive = self != TransitiveMode::Off;
        case.transitive_vis_at_leader = self == TransitiveMode::VisAtLeader;
    }
}

/// Declared domain of every axis. Empty axes produce an empty space.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AxisSet {
    pub transitive: Vec<TransitiveMode>,
    pub test_kinds: Vec<TestKind>,
    pub legacy_model: Vec<bool>,
    pub data_kinds: Vec<DataKind>,
    pub coherent: Vec<bool>,
    pub sync_kinds: Vec<SyncKind>,
    pub atomic_rmw: Vec<bool>,
    pub scopes: Vec<Scope>,
    pub payload_mem_local: Vec<bool>,
    pub guard_mem_local: Vec<bool>,
    pub payload_storage: Vec<StorageClass>,
    pub guard_storage: Vec<StorageClass>,
    pub stages: Vec<Stage>,
}

impl Default for AxisSet {
    fn default() -> Self {
        Self {
            transitive: TransitiveMode::ALL.to_vec(),
            test_kinds: TestKind::ALL.to_vec(),
            legacy_model: vec![false, true],
            data_kinds: DataKind::ALL.to_vec(),
            coherent: vec![false, true],
            sync_kinds: SyncKind::ALL.to_vec(),
            atomic_rmw: vec![false, true],
            scopes: Scope::ALL.to_vec(),
            payload_mem_local: vec![false, true],
            guard_mem_local: vec![false, true],
            payload_storage: StorageClass::ALL.to_vec(),
            guard_storage: StorageClass::ALL.to_vec(),
            stages: Stage::ALL.to_vec(),
        }
    }
}

impl AxisSet {
    /// The reduced subset runnable without the modern memory-model extension.
    pub fn mustpass_legacy() -> Self {
        Self {
            transitive: vec![TransitiveMode::Off],
            legacy_model: vec![true],
            data_kinds: vec![DataKind::U32, DataKind::F32],
            coherent: vec![true],
            sync_kinds: vec![
                SyncKind::FenceFence,
                SyncKind::ControlBarrier,
                SyncKind::ControlAndMemoryBarrier,
            ],
            atomic_rmw: vec![false],
            scopes: vec![Scope::Device, Scope::Workgroup, Scope::Subgroup],
            payload_storage: vec![
                StorageClass::Buffer,
                StorageClass::Image,
                StorageClass::Workgroup,
            ],
            guard_storage: vec![
                StorageClass::Buffer,
                StorageClass::Image,
                StorageClass::Workgroup,
            ],
            ..Self::default()
        }
    }

    /// Restrict the space to one registration family.
    pub fn for_family(mut self, family: Family) -> Self {
        match family {
            Family::MessagePassing => {
                self.transitive = vec![TransitiveMode::Off];
                self.test_kinds = vec![TestKind::MessagePassing];
            }
            Family::WriteAfterRead => {
                self.transitive = vec![TransitiveMode::Off];
                self.test_kinds = vec![TestKind::WriteAfterRead];
            }
            Family::Transitive => {
                self.transitive
                    .retain(|mode| *mode != TransitiveMode::Off);
                self.test_kinds = vec![TestKind::MessagePassing];
            }
        }
        self
    }

    fn radices(&self) -> [u64; AXIS_COUNT] {
        [
            self.transitive.len() as u64,
            self.test_kinds.len() as u64,
            self.legacy_model.len() as u64,
            self.data_kinds.len() as u64,
            self.coherent.len() as u64,
            self.sync_kinds.len() as u64,
            self.atomic_rmw.len() as u64,
            self.scopes.len() as u64,
            self.payload_mem_local.len() as u64,
            self.guard_mem_local.len() as u64,
            self.payload_storage.len() as u64,
            self.guard_storage.len() as u64,
            self.stages.len() as u64,
        ]
    }

    /// Size of the unfiltered Cartesian product.
    pub fn candidate_count(&self) -> u64 {
        self.radices().iter().product()
    }

    /// Decode a mixed-radix index; the last axis varies fastest.
    fn decode(&self, mut index: u64) -> CaseDef {
        let radices = self.radices();
        let mut digits = [0usize; AXIS_COUNT];
        for axis in (0..AXIS_COUNT).rev() {
            digits[axis] = (index % radices[axis]) as usize;
            index /= radices[axis];
        }

        let mut case = CaseDef {
            test_kind: self.test_kinds[digits[1]],
            legacy_model: self.legacy_model[digits[2]],
            data_kind: self.data_kinds[digits[3]],
            coherent: self.coherent[digits[4]],
            sync_kind: self.sync_kinds[digits[5]],
            atomic_rmw: self.atomic_rmw[digits[6]],
            scope: self.scopes[digits[7]],
            payload_mem_local: self.payload_mem_local[digits[8]],
            guard_mem_local: self.guard_mem_local[digits[9]],
            payload_storage: self.payload_storage[digits[10]],
            guard_storage: self.guard_storage[digits[11]],
            stage: self.stages[digits[12]],
            ..CaseDef::default()
        };
        self.transitive[digits[0]].apply(&mut case);
        case
    }
}

const AXIS_COUNT: usize = 13;

/// A lazily enumerated, finite configuration space.
#[derive(Debug, Clone, Default)]
pub struct ConfigurationSpace {
    axes: AxisSet,
}

impl ConfigurationSpace {
    pub fn new(axes: AxisSet) -> Self {
        Self { axes }
    }

    pub fn axes(&self) -> &AxisSet {
        &self.axes
    }

    /// A fresh iterator over the legal configurations.
    pub fn iter(&self) -> Cases<'_> {
        enumerate(&self.axes)
    }

    pub fn candidate_count(&self) -> u64 {
        self.axes.candidate_count()
    }
}

impl<'a> IntoIterator for &'a ConfigurationSpace {
    type Item = CaseDef;
    type IntoIter = Cases<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Enumerate every legal configuration of `axes`.
pub fn enumerate(axes: &AxisSet) -> Cases<'_> {
    Cases {
        axes,
        next: 0,
        total: axes.candidate_count(),
    }
}

/// Iterator over legal configurations. Cloning snapshots the cursor.
#[derive(Debug, Clone)]
pub struct Cases<'a> {
    axes: &'a AxisSet,
    next: u64,
    total: u64,
}

impl Iterator for Cases<'_> {
    type Item = CaseDef;

    fn next(&mut self) -> Option<CaseDef> {
        while self.next < self.total {
            let case = self.axes.decode(self.next);
            self.next += 1;
            if first_violation(&case).is_none() {
                return Some(case);
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.total - self.next).ok();
        (0, remaining)
    }
}

impl std::iter::FusedIterator for Cases<'_> {}

//! Protocol synthesis.
//!
//! A configuration is turned into a [`ProtocolPlan`] by a fixed pipeline of
//! step functions, each contributing the statements of one protocol phase.
//! The plan is then rendered as GLSL ([`glsl`]) and packaged as
//! [`ProgramText`] for a compilation collaborator.

pub mod glsl;
pub mod plan;
pub mod semantics;
mod transitive;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use mm_types::{CaseDef, Scope, Stage, StorageClass, SyncKind, TestKind};

use crate::config_space;
use crate::domain::InvocationDomain;
use crate::errors::ConformanceError;
use crate::pairing::mapping_scope;

pub use plan::{Attached, Op, ProtocolPlan, Slot, Var};
pub use semantics::{compose, Carrier, MemorySemantics, StorageSemantics, SyncSemantics};

/// One phase of the protocol.
type Step = fn(&CaseDef, &InvocationDomain) -> Vec<Op>;

const MESSAGE_PIPELINE: [Step; 6] = [
    prologue,
    coordinates,
    init_shared,
    payload_before_sync,
    synchronize,
    payload_after_sync,
];

/// How a program resource is exposed to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    StorageBuffer,
    StorageImage,
    /// Lives only in workgroup-shared memory; nothing to bind.
    Workgroup,
    /// Device address supplied through a push constant.
    PhysicalBufferReference,
}

/// A named storage resource the program declares.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Binding {
    pub name: String,
    pub kind: ResourceKind,
    /// Descriptor binding within set 0, when the resource has one.
    pub slot: Option<u32>,
}

/// Values for the two specialization constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Specialization {
    pub dim: u32,
    pub workgroups_per_dim: u32,
}

/// Synthesized program source and everything needed to compile it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramText {
    pub name: String,
    pub stage: Stage,
    pub source: String,
    /// Companion vertex program for fragment tests.
    pub auxiliary: Option<String>,
    pub specialization: Specialization,
    pub bindings: Vec<Binding>,
}

impl ProgramText {
    /// Hex SHA-256 of the source, stage and specialization constants.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.source.as_bytes());
        if let Some(aux) = &self.auxiliary {
            hasher.update(aux.as_bytes());
        }
        hasher.update(self.stage.token().as_bytes());
        hasher.update(self.specialization.dim.to_le_bytes());
        hasher.update(self.specialization.workgroups_per_dim.to_le_bytes());
        hex::encode(hasher.finalize())
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name == name)
    }
}

/// A configuration together with its plan and rendered text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SynthesizedProgram {
    pub case: CaseDef,
    pub domain: InvocationDomain,
    pub plan: ProtocolPlan,
    pub text: ProgramText,
}

/// Build the protocol plan for a validated configuration.
pub fn plan(case: &CaseDef, domain: &InvocationDomain) -> ProtocolPlan {
    let ops = if case.transitive {
        transitive::steps(case, domain)
    } else {
        MESSAGE_PIPELINE
            .iter()
            .flat_map(|step| step(case, domain))
            .collect()
    };
    let mapping = if case.transitive {
        Scope::Device
    } else {
        mapping_scope(case)
    };
    ProtocolPlan {
        case: *case,
        mapping,
        ops,
    }
}

/// Validate `case`, then synthesize its program for `domain`.
///
/// The domain's stage is taken from the configuration.
pub fn synthesize(
    case: &CaseDef,
    domain: &InvocationDomain,
) -> Result<SynthesizedProgram, ConformanceError> {
    config_space::validate(case)?;
    let domain = InvocationDomain {
        stage: case.stage,
        ..*domain
    };
    let plan = plan(case, &domain);
    let rendered = glsl::render(&plan, &domain);
    tracing::debug!(
        case = %case,
        ops = plan.ops.len(),
        bytes = rendered.source.len(),
        "synthesized program"
    );
    let text = ProgramText {
        name: case.name(),
        stage: case.stage,
        source: rendered.source,
        auxiliary: rendered.auxiliary,
        specialization: Specialization {
            dim: domain.dim,
            workgroups_per_dim: domain.workgroups_per_dim,
        },
        bindings: rendered.bindings,
    };
    Ok(SynthesizedProgram {
        case: *case,
        domain,
        plan,
        text,
    })
}

fn prologue(case: &CaseDef, _: &InvocationDomain) -> Vec<Op> {
    let mut ops = Vec::new();
    if case.stage == Stage::Fragment {
        ops.push(Op::KillHelpers);
    }
    if mapping_scope(case) == Scope::Subgroup {
        ops.push(Op::BailIfPartnerInactive);
    }
    ops
}

fn coordinates(case: &CaseDef, _: &InvocationDomain) -> Vec<Op> {
    vec![Op::Coordinates {
        mapping: mapping_scope(case),
    }]
}

fn shared_vars(case: &CaseDef) -> Vec<Var> {
    let mut vars = Vec::new();
    if case.payload_storage == StorageClass::Workgroup {
        vars.push(Var::Payload);
    }
    if case.has_guard() && case.guard_storage == StorageClass::Workgroup {
        vars.push(Var::Guard);
    }
    vars
}

fn init_shared(case: &CaseDef, _: &InvocationDomain) -> Vec<Op> {
    let vars = shared_vars(case);
    if vars.is_empty() {
        return Vec::new();
    }
    let mut ops: Vec<Op> = vars.into_iter().map(|var| Op::InitShared { var }).collect();
    ops.push(Op::ScopeBarrier {
        scope: mapping_scope(case),
    });
    ops
}

fn payload_before_sync(case: &CaseDef, _: &InvocationDomain) -> Vec<Op> {
    match case.test_kind {
        TestKind::MessagePassing => vec![Op::WritePayload],
        TestKind::WriteAfterRead => vec![Op::LoadPayload],
    }
}

fn synchronize(case: &CaseDef, _: &InvocationDomain) -> Vec<Op> {
    let sem = compose(case);
    match case.sync_kind {
        SyncKind::ControlAndMemoryBarrier => vec![
            Op::MemoryBarrier {
                scope: case.scope,
                attached: Attached {
                    storage: sem.release_storage,
                    semantics: sem.release,
                },
            },
            Op::ControlBarrier {
                execution: case.scope,
                memory: None,
            },
            Op::MemoryBarrier {
                scope: case.scope,
                attached: Attached {
                    storage: sem.acquire_storage,
                    semantics: sem.acquire,
                },
            },
        ],
        SyncKind::ControlBarrier => vec![Op::ControlBarrier {
            execution: case.scope,
            memory: Some((
                case.scope,
                Attached {
                    storage: sem.release_storage | sem.acquire_storage,
                    semantics: sem.acquire_release,
                },
            )),
        }],
        _ => {
            let mut ops = release_ops(case, &sem, Slot::Own);
            ops.extend(acquire_ops(case, &sem, Slot::Partner));
            ops
        }
    }
}

/// Guard release on `slot`, with a leading fence when the fence carries it.
pub(crate) fn release_ops(case: &CaseDef, sem: &SyncSemantics, slot: Slot) -> Vec<Op> {
    let attached = Attached {
        storage: sem.release_storage,
        semantics: sem.release,
    };
    match sem.release_carrier {
        Carrier::Fence => vec![
            Op::MemoryBarrier {
                scope: case.scope,
                attached,
            },
            Op::GuardRelease {
                slot,
                scope: case.scope,
                rmw: case.atomic_rmw,
                attached: None,
            },
        ],
        Carrier::Atomic => vec![Op::GuardRelease {
            slot,
            scope: case.scope,
            rmw: case.atomic_rmw,
            attached: Some(attached),
        }],
    }
}

/// Guard acquire on `slot`, with a trailing fence when the fence carries it.
pub(crate) fn acquire_ops(case: &CaseDef, sem: &SyncSemantics, slot: Slot) -> Vec<Op> {
    let attached = Attached {
        storage: sem.acquire_storage,
        semantics: sem.acquire,
    };
    match sem.acquire_carrier {
        Carrier::Fence => vec![
            Op::GuardAcquire {
                slot,
                scope: case.scope,
                rmw: case.atomic_rmw,
                attached: None,
            },
            Op::MemoryBarrier {
                scope: case.scope,
                attached,
            },
        ],
        Carrier::Atomic => vec![Op::GuardAcquire {
            slot,
            scope: case.scope,
            rmw: case.atomic_rmw,
            attached: Some(attached),
        }],
    }
}

fn payload_after_sync(case: &CaseDef, _: &InvocationDomain) -> Vec<Op> {
    match case.test_kind {
        TestKind::MessagePassing => vec![Op::LoadPayload, Op::CheckMessage],
        TestKind::WriteAfterRead => vec![Op::WritePayloadIfObserved, Op::CheckWriteAfterRead],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainConfig, TargetLimits};
    use mm_types::DataKind;

    fn domain() -> InvocationDomain {
        DomainConfig::default()
            .resolve(Stage::Compute, &TargetLimits::default())
            .unwrap()
    }

    fn source(case: &CaseDef) -> String {
        synthesize(case, &domain()).unwrap().text.source
    }

    #[test]
    fn test_fence_fence_orders_fence_around_atomics() {
        let case = CaseDef::default();
        let ops = plan(&case, &domain()).ops;
        let kinds: Vec<&str> = ops
            .iter()
            .map(|op| match op {
                Op::MemoryBarrier { .. } => "fence",
                Op::GuardRelease { .. } => "release",
                Op::GuardAcquire { .. } => "acquire",
                Op::WritePayload => "write",
                Op::LoadPayload => "load",
                Op::CheckMessage => "check",
                _ => "other",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["other", "write", "fence", "release", "acquire", "fence", "load", "check"]
        );
    }

    #[test]
    fn test_atomic_atomic_noncoherent_source() {
        let case = CaseDef {
            sync_kind: SyncKind::AtomicAtomic,
            coherent: false,
            ..Default::default()
        };
        let src = source(&case);
        assert!(src.contains("#pragma use_vulkan_memory_model"));
        assert!(src.contains("nonprivate buffer Payload"));
        assert!(src.contains(
            "atomicStore(guard.x[bufferCoord], uint(1u), gl_ScopeDevice, gl_StorageSemanticsBuffer, gl_SemanticsRelease | gl_SemanticsMakeAvailable);"
        ));
        assert!(src.contains(
            "skip = atomicLoad(guard.x[partnerBufferCoord], gl_ScopeDevice, gl_StorageSemanticsBuffer, gl_SemanticsAcquire | gl_SemanticsMakeVisible) == 0;"
        ));
        assert!(!src.contains("memoryBarrier("));
        assert!(src.contains("payload.x[bufferCoord] = bufferCoord + (payload.x[partnerBufferCoord]>>31);"));
    }

    #[test]
    fn test_rmw_uses_exchange_with_consumed_value() {
        let case = CaseDef {
            sync_kind: SyncKind::AtomicAtomic,
            atomic_rmw: true,
            ..Default::default()
        };
        let src = source(&case);
        assert!(src.contains("atomicExchange(guard.x[bufferCoord], uint(1u)"));
        assert!(src.contains("skip = atomicExchange(guard.x[partnerBufferCoord], uint(2u)"));
    }

    #[test]
    fn test_control_barrier_has_no_guard() {
        let case = CaseDef {
            test_kind: TestKind::WriteAfterRead,
            scope: Scope::Workgroup,
            sync_kind: SyncKind::ControlBarrier,
            payload_storage: StorageClass::Workgroup,
            ..Default::default()
        };
        let synthesized = synthesize(&case, &domain()).unwrap();
        let src = &synthesized.text.source;
        assert!(!src.contains("guard"));
        assert!(src.contains(
            "controlBarrier(gl_ScopeWorkgroup, gl_ScopeWorkgroup, gl_StorageSemanticsShared, gl_SemanticsAcquireRelease);"
        ));
        assert!(src.contains("payload.x[sharedCoord] = uint(0);"));
        assert!(src.contains("barrier();"));
        assert!(synthesized.text.binding("guard").is_none());
        assert_eq!(
            synthesized.text.binding("payload").map(|b| b.kind),
            Some(ResourceKind::Workgroup)
        );
    }

    #[test]
    fn test_control_and_memory_barrier_brackets() {
        let case = CaseDef {
            scope: Scope::Workgroup,
            sync_kind: SyncKind::ControlAndMemoryBarrier,
            ..Default::default()
        };
        let src = source(&case);
        let release = src
            .find("memoryBarrier(gl_ScopeWorkgroup, gl_StorageSemanticsBuffer, gl_SemanticsRelease);")
            .unwrap();
        let barrier = src
            .find("controlBarrier(gl_ScopeWorkgroup, gl_ScopeInvocation, 0, 0);")
            .unwrap();
        let acquire = src
            .find("memoryBarrier(gl_ScopeWorkgroup, gl_StorageSemanticsBuffer, gl_SemanticsAcquire);")
            .unwrap();
        assert!(release < barrier && barrier < acquire);
    }

    #[test]
    fn test_float_payload_uses_bit_casts() {
        let case = CaseDef {
            data_kind: DataKind::F32,
            ..Default::default()
        };
        let src = source(&case);
        assert!(src.contains("float x[]"));
        assert!(src.contains("uintBitsToFloat(bufferCoord + (floatBitsToUint(payload.x[partnerBufferCoord])>>31))"));
        assert!(src.contains("floatBitsToUint(r) != partnerBufferCoord"));
    }

    #[test]
    fn test_war_writes_only_when_observed() {
        let case = CaseDef {
            test_kind: TestKind::WriteAfterRead,
            ..Default::default()
        };
        let src = source(&case);
        let load = src.find("uint r = payload.x[partnerBufferCoord];").unwrap();
        let store = src
            .find("if (paired && !skip) { payload.x[bufferCoord] = bufferCoord; }")
            .unwrap();
        assert!(load < store);
        assert!(src.contains("if (paired && r != 0)"));
    }

    #[test]
    fn test_fragment_ships_strip_program() {
        let case = CaseDef {
            stage: Stage::Fragment,
            ..Default::default()
        };
        let synthesized = synthesize(&case, &domain()).unwrap();
        assert_eq!(synthesized.domain.stage, Stage::Fragment);
        assert!(synthesized.text.source.contains("gl_HelperInvocation"));
        assert_eq!(
            synthesized.text.auxiliary.as_deref(),
            Some(glsl::FULLSCREEN_STRIP_VERTEX)
        );
        assert!(!synthesized.text.source.contains("local_size_x_id"));
    }

    #[test]
    fn test_invalid_case_is_rejected_before_synthesis() {
        let case = CaseDef {
            atomic_rmw: true,
            ..Default::default()
        };
        assert!(matches!(
            synthesize(&case, &domain()),
            Err(ConformanceError::ConfigurationInvalid { .. })
        ));
    }

    #[test]
    fn test_digest_tracks_specialization() {
        let case = CaseDef::default();
        let a = synthesize(&case, &domain()).unwrap().text;
        let small = DomainConfig::default()
            .with_dim(8)
            .resolve(Stage::Compute, &TargetLimits::default())
            .unwrap();
        let b = synthesize(&case, &small).unwrap().text;
        assert_eq!(a.source, b.source);
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}

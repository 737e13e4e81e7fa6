//! Two-hop message passing through a per-workgroup leader.
//!
//! Every invocation writes its payload and meets its workgroup at a
//! workgroup-scope barrier; the leader then releases the workgroup's guard
//! at device scope. On the consuming side either every invocation acquires
//! the partner workgroup's guard itself, or only the leader does and relays
//! the result through workgroup-shared memory.

use mm_types::{CaseDef, Scope};

use super::plan::{Attached, Op, Slot};
use super::semantics::{compose, MemorySemantics, StorageSemantics};
use super::{acquire_ops, release_ops};
use crate::domain::InvocationDomain;

pub(crate) fn steps(case: &CaseDef, _domain: &InvocationDomain) -> Vec<Op> {
    let sem = compose(case);
    let payload = StorageSemantics::of(case.payload_storage);

    let mut ops = vec![
        Op::Coordinates {
            mapping: Scope::Device,
        },
        Op::TransitiveCoordinates,
        Op::WritePayload,
        workgroup_barrier(payload),
        Op::Leader(release_ops(case, &sem, Slot::OwnWorkgroup)),
    ];

    if case.transitive_vis_at_leader {
        let mut leader = acquire_ops(case, &sem, Slot::PartnerWorkgroup);
        leader.push(Op::PublishFlag);
        ops.push(Op::Leader(leader));
        ops.push(workgroup_barrier(payload | StorageSemantics::SHARED));
        ops.push(Op::ReadFlag);
    } else {
        ops.extend(acquire_ops(case, &sem, Slot::PartnerWorkgroup));
    }

    ops.push(Op::LoadPayload);
    ops.push(Op::CheckMessage);
    ops
}

fn workgroup_barrier(storage: StorageSemantics) -> Op {
    Op::ControlBarrier {
        execution: Scope::Workgroup,
        memory: Some((
            Scope::Workgroup,
            Attached {
                storage,
                semantics: MemorySemantics::acquire_release(true),
            },
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainConfig, TargetLimits};
    use crate::synth::synthesize;
    use mm_types::{Stage, SyncKind};

    fn transitive_case(vis_at_leader: bool) -> CaseDef {
        CaseDef {
            coherent: false,
            sync_kind: SyncKind::AtomicAtomic,
            transitive: true,
            transitive_vis_at_leader: vis_at_leader,
            ..Default::default()
        }
    }

    fn domain() -> InvocationDomain {
        DomainConfig::default()
            .resolve(Stage::Compute, &TargetLimits::default())
            .unwrap()
    }

    #[test]
    fn test_destination_acquires_itself() {
        let ops = steps(&transitive_case(false), &domain());
        let leaders = ops.iter().filter(|op| matches!(op, Op::Leader(_))).count();
        assert_eq!(leaders, 1);
        assert!(ops.iter().any(|op| matches!(
            op,
            Op::GuardAcquire {
                slot: Slot::PartnerWorkgroup,
                ..
            }
        )));
        assert_eq!(ops.iter().filter(|op| op.is_execution_barrier()).count(), 1);
    }

    #[test]
    fn test_vis_at_leader_relays_through_shared_flag() {
        let ops = steps(&transitive_case(true), &domain());
        let barriers = ops.iter().filter(|op| op.is_execution_barrier()).count();
        assert_eq!(barriers, 2);
        match &ops[5] {
            Op::Leader(inner) => {
                assert!(matches!(inner[0], Op::GuardAcquire { .. }));
                assert_eq!(inner.last(), Some(&Op::PublishFlag));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(ops.contains(&Op::ReadFlag));
    }

    #[test]
    fn test_rendered_leader_block() {
        let synthesized = synthesize(&transitive_case(true), &domain()).unwrap();
        let src = &synthesized.text.source;
        assert!(src.contains("shared uint transitiveFlag;"));
        assert!(src.contains("   if (leader) {\n      atomicStore(guard.x[workgroupCoord]"));
        assert!(src.contains("atomicLoad(guard.x[partnerWorkgroupCoord]"));
        assert!(src.contains(
            "controlBarrier(gl_ScopeWorkgroup, gl_ScopeWorkgroup, gl_StorageSemanticsBuffer, gl_SemanticsAcquireRelease | gl_SemanticsMakeAvailable | gl_SemanticsMakeVisible);"
        ));
        assert!(src.contains("skip = transitiveFlag == 0u;"));
    }
}

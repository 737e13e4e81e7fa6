//! The protocol plan: an explicit list of program steps.
//!
//! A plan is what the synthesizer decides; the GLSL renderer prints it and
//! execution backends may interpret it directly. Statements run top to
//! bottom in every invocation.

use serde::{Deserialize, Serialize};

use mm_types::{CaseDef, Scope};

use super::semantics::{MemorySemantics, StorageSemantics};

/// A protocol variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Var {
    Payload,
    Guard,
}

/// Which element of a variable an access addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    /// The invocation's own coordinate.
    Own,
    /// The partner's coordinate.
    Partner,
    /// One element per workgroup: the invocation's workgroup.
    OwnWorkgroup,
    /// One element per workgroup: the partner's workgroup.
    PartnerWorkgroup,
}

/// Semantics attached to a memory barrier or to an atomic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attached {
    pub storage: StorageSemantics,
    pub semantics: MemorySemantics,
}

/// One statement of the synthesized program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// Fragment helper invocations return immediately.
    KillHelpers,
    /// Subgroup mapping: return when the mirrored lane is inactive.
    BailIfPartnerInactive,
    /// Compute own and partner coordinates plus the `paired` predicate.
    Coordinates { mapping: Scope },
    /// Compute workgroup coordinates and the `leader` predicate.
    TransitiveCoordinates,
    /// Zero the invocation's element of a workgroup-storage variable.
    InitShared { var: Var },
    /// Execution barrier of the given scope with no memory semantics of its own
    /// beyond the default shared-memory ordering.
    ScopeBarrier { scope: Scope },
    /// Message passing: store the tagged payload value (anti-hoisting form).
    WritePayload,
    /// Write-after-read: store the payload value only if the guard was observed.
    WritePayloadIfObserved,
    /// `r = payload[partner]`.
    LoadPayload,
    MemoryBarrier { scope: Scope, attached: Attached },
    /// `controlBarrier(execution, memory...)`; `None` means
    /// `gl_ScopeInvocation` with empty semantics.
    ControlBarrier {
        execution: Scope,
        memory: Option<(Scope, Attached)>,
    },
    /// Atomically write `1` to the guard.
    GuardRelease {
        slot: Slot,
        scope: Scope,
        rmw: bool,
        attached: Option<Attached>,
    },
    /// Atomically read (or exchange `2` into) the guard; `skip` when it was `0`.
    GuardAcquire {
        slot: Slot,
        scope: Scope,
        rmw: bool,
        attached: Option<Attached>,
    },
    /// Statements only the leader executes.
    Leader(Vec<Op>),
    /// Leader: publish whether the release was observed into shared memory.
    PublishFlag,
    /// Everyone: take `skip` from the leader's shared flag.
    ReadFlag,
    /// `if (paired && !skip && r != partner tag) fail`.
    CheckMessage,
    /// `if (paired && r != 0) fail`.
    CheckWriteAfterRead,
}

impl Op {
    /// Whether the statement synchronizes execution across a workgroup.
    pub fn is_execution_barrier(&self) -> bool {
        matches!(self, Op::ScopeBarrier { .. } | Op::ControlBarrier { .. })
    }
}

/// The synthesized step list for one configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolPlan {
    pub case: CaseDef,
    pub mapping: Scope,
    pub ops: Vec<Op>,
}

impl ProtocolPlan {
    /// Every statement, with leader blocks flattened in place.
    pub fn flattened(&self) -> Vec<&Op> {
        fn walk<'a>(ops: &'a [Op], out: &mut Vec<&'a Op>) {
            for op in ops {
                out.push(op);
                if let Op::Leader(inner) = op {
                    walk(inner, out);
                }
            }
        }
        let mut out = Vec::new();
        walk(&self.ops, &mut out);
        out
    }

    /// Top-level statements split at execution barriers; the barrier closes
    /// its segment.
    pub fn segments(&self) -> Vec<&[Op]> {
        let mut segments = Vec::new();
        let mut start = 0;
        for (i, op) in self.ops.iter().enumerate() {
            if op.is_execution_barrier() {
                segments.push(&self.ops[start..=i]);
                start = i + 1;
            }
        }
        if start < self.ops.len() {
            segments.push(&self.ops[start..]);
        }
        segments
    }

    pub fn uses_transitive_flag(&self) -> bool {
        self.flattened()
            .iter()
            .any(|op| matches!(op, Op::PublishFlag | Op::ReadFlag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segments_split_after_barriers() {
        let plan = ProtocolPlan {
            case: CaseDef::default(),
            mapping: Scope::Workgroup,
            ops: vec![
                Op::Coordinates {
                    mapping: Scope::Workgroup,
                },
                Op::InitShared { var: Var::Payload },
                Op::ScopeBarrier {
                    scope: Scope::Workgroup,
                },
                Op::WritePayload,
                Op::ControlBarrier {
                    execution: Scope::Workgroup,
                    memory: None,
                },
                Op::LoadPayload,
                Op::CheckMessage,
            ],
        };
        let segments = plan.segments();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[0].len(), 3);
        assert!(segments[1][1].is_execution_barrier());
        assert_eq!(segments[2], &[Op::LoadPayload, Op::CheckMessage][..]);
    }

    #[test]
    fn test_flattened_includes_leader_body() {
        let plan = ProtocolPlan {
            case: CaseDef::default(),
            mapping: Scope::Device,
            ops: vec![Op::Leader(vec![Op::PublishFlag]), Op::ReadFlag],
        };
        assert_eq!(plan.flattened().len(), 3);
        assert!(plan.uses_transitive_flag());
    }
}

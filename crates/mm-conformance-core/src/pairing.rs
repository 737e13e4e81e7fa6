//! Invocation pairing.
//!
//! Every invocation is matched with exactly one partner so that the mapping is
//! an involution over the domain:
//!
//! - device / queue-family: mirror the whole `extent × extent` plane about its centre
//! - workgroup: mirror the local id inside the invoking tile
//! - subgroup: swap lane `l` with lane `l ^ (S - 1)` inside the active subgroup
//!
//! The same mapping is exposed twice: as a host-side function for checking
//! and emulation ([`PairingModel`]), and as GLSL text for the synthesized
//! program ([`coordinate_source`]). Both must agree.

use serde::{Deserialize, Serialize};

use mm_types::{CaseDef, Scope, Stage, StorageClass};

use crate::domain::{InvocationDomain, InvocationId};

/// The scope whose pairing formula a configuration uses.
///
/// Device and queue-family scopes fall back to the workgroup mapping when
/// either variable lives in workgroup storage, since a partner in another
/// workgroup could not see it.
pub fn mapping_scope(case: &CaseDef) -> Scope {
    let shared = case.payload_storage == StorageClass::Workgroup
        || (case.has_guard() && case.guard_storage == StorageClass::Workgroup);
    match case.scope {
        Scope::Device | Scope::QueueFamily if shared => Scope::Workgroup,
        scope => scope,
    }
}

/// Addresses one invocation uses to reach each kind of storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coordinates {
    /// Index into buffer storage and into the fail buffer.
    pub buffer: u32,
    /// Index into workgroup storage.
    pub shared: u32,
    /// Texel in image storage.
    pub image: [u32; 2],
    /// Tile / workgroup position.
    pub workgroup: [u32; 2],
}

impl Coordinates {
    /// Buffer index laid out row-major over the whole plane.
    pub fn row_major(domain: &InvocationDomain, global: [u32; 2]) -> Self {
        let (tile, local) = domain.split(global);
        Self {
            buffer: global[1] * domain.extent() + global[0],
            shared: local[1] * domain.dim + local[0],
            image: global,
            workgroup: tile,
        }
    }

    /// Buffer index laid out tile by tile.
    pub fn tiled(domain: &InvocationDomain, tile: [u32; 2], local: [u32; 2]) -> Self {
        let shared = local[1] * domain.dim + local[0];
        Self {
            buffer: (tile[1] * domain.workgroups_per_dim + tile[0]) * domain.tile_invocations()
                + shared,
            shared,
            image: [tile[0] * domain.dim + local[0], tile[1] * domain.dim + local[1]],
            workgroup: tile,
        }
    }

    pub fn image_index(&self, domain: &InvocationDomain) -> u32 {
        self.image[1] * domain.extent() + self.image[0]
    }

    pub fn workgroup_index(&self, domain: &InvocationDomain) -> u32 {
        self.workgroup[1] * domain.workgroups_per_dim + self.workgroup[0]
    }

    /// Image texel addressing a whole workgroup.
    pub fn workgroup_image_index(&self, domain: &InvocationDomain) -> u32 {
        self.workgroup[1] * domain.extent() + self.workgroup[0]
    }
}

/// Result of pairing one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pairing {
    Paired { own: Coordinates, partner: Coordinates },
    /// Centre of an odd mirror; excluded from the write and check roles.
    Singleton { own: Coordinates },
    /// Subgroup partner lane is not active; the invocation bails out.
    PartnerInactive,
}

impl Pairing {
    fn from_pair(own: Coordinates, partner: Coordinates) -> Self {
        if own.buffer == partner.buffer {
            Pairing::Singleton { own }
        } else {
            Pairing::Paired { own, partner }
        }
    }

    pub fn own(&self) -> Option<Coordinates> {
        match self {
            Pairing::Paired { own, .. } | Pairing::Singleton { own } => Some(*own),
            Pairing::PartnerInactive => None,
        }
    }

    /// Partner coordinates; a singleton is its own partner.
    pub fn partner(&self) -> Option<Coordinates> {
        match self {
            Pairing::Paired { partner, .. } => Some(*partner),
            Pairing::Singleton { own } => Some(*own),
            Pairing::PartnerInactive => None,
        }
    }
}

/// Host-side pairing function. Custom models let tests inject mispairings.
pub trait PairingModel: Send + Sync + std::fmt::Debug {
    fn pair(
        &self,
        domain: &InvocationDomain,
        mapping: Scope,
        subgroup_size: u32,
        id: InvocationId,
    ) -> Pairing;
}

/// The mirror pairing the synthesized programs implement.
#[derive(Debug, Clone, Copy, Default)]
pub struct MirrorPairing;

impl PairingModel for MirrorPairing {
    fn pair(
        &self,
        domain: &InvocationDomain,
        mapping: Scope,
        subgroup_size: u32,
        id: InvocationId,
    ) -> Pairing {
        let global = domain.global_position(id);
        match mapping {
            Scope::Device | Scope::QueueFamily => {
                let last = domain.extent() - 1;
                let partner = [last - global[0], last - global[1]];
                Pairing::from_pair(
                    Coordinates::row_major(domain, global),
                    Coordinates::row_major(domain, partner),
                )
            }
            Scope::Workgroup => {
                let (tile, local) = domain.split(global);
                let last = domain.dim - 1;
                let partner = [last - local[0], last - local[1]];
                Pairing::from_pair(
                    Coordinates::tiled(domain, tile, local),
                    Coordinates::tiled(domain, tile, partner),
                )
            }
            Scope::Subgroup => pair_in_subgroup(domain, subgroup_size.max(1), id),
        }
    }
}

/// Lane `l` of a power-of-two subgroup of size `s` pairs with lane `l ^ (s-1)`.
/// Returns `None` when that lane is past the end of the partitioned range.
fn mirrored_lane(index: u32, subgroup_size: u32, range: u32) -> Option<u32> {
    let lane = index % subgroup_size;
    let partner = index - lane + (lane ^ (subgroup_size - 1));
    (partner < range).then_some(partner)
}

fn pair_in_subgroup(domain: &InvocationDomain, subgroup_size: u32, id: InvocationId) -> Pairing {
    let extent = domain.extent();
    match id {
        InvocationId::Compute { workgroup, local } => {
            let linear = local[1] * domain.dim + local[0];
            match mirrored_lane(linear, subgroup_size, domain.tile_invocations()) {
                Some(partner) => Pairing::from_pair(
                    Coordinates::tiled(domain, workgroup, local),
                    Coordinates::tiled(
                        domain,
                        workgroup,
                        [partner % domain.dim, partner / domain.dim],
                    ),
                ),
                None => Pairing::PartnerInactive,
            }
        }
        InvocationId::Vertex { index } => {
            match mirrored_lane(index, subgroup_size, domain.invocation_count()) {
                Some(partner) => Pairing::from_pair(
                    Coordinates::row_major(domain, [index % extent, index / extent]),
                    Coordinates::row_major(domain, [partner % extent, partner / extent]),
                ),
                None => Pairing::PartnerInactive,
            }
        }
        InvocationId::Fragment { x, y } => {
            let linear = y * extent + x;
            match mirrored_lane(linear, subgroup_size, domain.invocation_count()) {
                Some(partner) => {
                    let (tile, local) = domain.split([x, y]);
                    let (partner_tile, partner_local) =
                        domain.split([partner % extent, partner / extent]);
                    Pairing::from_pair(
                        Coordinates::tiled(domain, tile, local),
                        Coordinates::tiled(domain, partner_tile, partner_local),
                    )
                }
                None => Pairing::PartnerInactive,
            }
        }
    }
}

/// Pair `id` with the mirror mapping.
pub fn pair_invocation(
    domain: &InvocationDomain,
    mapping: Scope,
    subgroup_size: u32,
    id: InvocationId,
) -> Pairing {
    MirrorPairing.pair(domain, mapping, subgroup_size, id)
}

/// Global position of the invocation owning fail-buffer slot `index`.
///
/// Inverts the `buffer` field of the [`Coordinates`] that `mapping` assigns:
/// row-major for device-wide mirrors and vertex subgroups, tile by tile
/// otherwise.
pub fn buffer_position(domain: &InvocationDomain, mapping: Scope, index: u32) -> [u32; 2] {
    let row_major = match mapping {
        Scope::Device | Scope::QueueFamily => true,
        Scope::Subgroup => domain.stage == Stage::Vertex,
        Scope::Workgroup => false,
    };
    if row_major {
        let extent = domain.extent();
        return [index % extent, index / extent];
    }
    let n = domain.workgroups_per_dim;
    let group = index / domain.tile_invocations();
    let local = index % domain.tile_invocations();
    [
        (group % n) * domain.dim + local % domain.dim,
        (group / n) * domain.dim + local / domain.dim,
    ]
}

const GLOBAL_MIRROR: &str = concat!(
    "   ivec2 partnerGlobalId   = ivec2(DIM*NUM_WORKGROUP_EACH_DIM-1) - globalId;\n",
    "   uint bufferCoord        = globalId.y * DIM*NUM_WORKGROUP_EACH_DIM + globalId.x;\n",
    "   uint partnerBufferCoord = partnerGlobalId.y * DIM*NUM_WORKGROUP_EACH_DIM + partnerGlobalId.x;\n",
    "   ivec2 imageCoord        = globalId;\n",
    "   ivec2 partnerImageCoord = partnerGlobalId;\n",
);

const TILED_COORDS: &str = concat!(
    "   uint sharedCoord        = localId.y * DIM + localId.x;\n",
    "   uint partnerSharedCoord = partnerLocalId.y * DIM + partnerLocalId.x;\n",
    "   uint bufferCoord        = (groupId.y * NUM_WORKGROUP_EACH_DIM + groupId.x)*DIM*DIM + sharedCoord;\n",
    "   uint partnerBufferCoord = (partnerGroupId.y * NUM_WORKGROUP_EACH_DIM + partnerGroupId.x)*DIM*DIM + partnerSharedCoord;\n",
    "   ivec2 imageCoord        = groupId * ivec2(DIM) + localId;\n",
    "   ivec2 partnerImageCoord = partnerGroupId * ivec2(DIM) + partnerLocalId;\n",
);

fn global_id(stage: Stage) -> &'static str {
    match stage {
        Stage::Compute => "   ivec2 globalId          = ivec2(gl_GlobalInvocationID.xy);\n",
        Stage::Vertex => "   ivec2 globalId          = ivec2(gl_VertexIndex % (DIM*NUM_WORKGROUP_EACH_DIM), gl_VertexIndex / (DIM*NUM_WORKGROUP_EACH_DIM));\n",
        Stage::Fragment => "   ivec2 globalId          = ivec2(gl_FragCoord.xy);\n",
    }
}

fn tile_ids(stage: Stage) -> String {
    match stage {
        Stage::Compute => "   ivec2 localId           = ivec2(gl_LocalInvocationID.xy);\n\
                           \x20  ivec2 groupId           = ivec2(gl_WorkGroupID.xy);\n"
            .to_string(),
        _ => format!(
            "{}   ivec2 localId           = globalId % ivec2(DIM);\n\
             \x20  ivec2 groupId           = globalId / ivec2(DIM);\n",
            global_id(stage)
        ),
    }
}

/// GLSL statements computing `bufferCoord`, `partnerBufferCoord`,
/// `imageCoord`, `partnerImageCoord` (and the shared coordinates where the
/// mapping is tiled), followed by the `paired` predicate.
pub fn coordinate_source(mapping: Scope, stage: Stage) -> String {
    let mut src = String::new();
    match mapping {
        Scope::Device | Scope::QueueFamily => {
            src.push_str(global_id(stage));
            src.push_str(GLOBAL_MIRROR);
        }
        Scope::Workgroup => {
            src.push_str(&tile_ids(stage));
            src.push_str("   ivec2 partnerLocalId    = ivec2(DIM-1) - localId;\n");
            src.push_str("   ivec2 partnerGroupId    = groupId;\n");
            src.push_str(TILED_COORDS);
        }
        Scope::Subgroup => match stage {
            Stage::Vertex => src.push_str(
                "   uint bufferCoord        = gl_VertexIndex;\n\
                 \x20  uint partnerBufferCoord = subgroupShuffleXor(gl_VertexIndex, gl_SubgroupSize-1);\n\
                 \x20  ivec2 imageCoord        = ivec2(gl_VertexIndex % (DIM*NUM_WORKGROUP_EACH_DIM), gl_VertexIndex / (DIM*NUM_WORKGROUP_EACH_DIM));\n\
                 \x20  ivec2 partnerImageCoord = subgroupShuffleXor(imageCoord, gl_SubgroupSize-1);\n",
            ),
            Stage::Compute => {
                src.push_str(&tile_ids(stage));
                src.push_str("   ivec2 partnerLocalId    = subgroupShuffleXor(localId, gl_SubgroupSize-1);\n");
                src.push_str("   ivec2 partnerGroupId    = groupId;\n");
                src.push_str(TILED_COORDS);
            }
            Stage::Fragment => {
                src.push_str(&tile_ids(stage));
                src.push_str("   ivec2 partnerLocalId    = subgroupShuffleXor(localId, gl_SubgroupSize-1);\n");
                src.push_str("   ivec2 partnerGroupId    = subgroupShuffleXor(groupId, gl_SubgroupSize-1);\n");
                src.push_str(TILED_COORDS);
            }
        },
    }
    src.push_str("   bool paired             = bufferCoord != partnerBufferCoord;\n");
    src
}

/// GLSL statements for the two-hop protocol: workgroup coordinates of the
/// invocation and of its partner, plus the `leader` predicate.
pub fn transitive_source(domain: &InvocationDomain) -> String {
    format!(
        "   ivec2 workgroupId           = ivec2(gl_WorkGroupID.xy);\n\
         \x20  ivec2 partnerWorkgroupId    = partnerGlobalId / ivec2(DIM);\n\
         \x20  uint workgroupCoord         = workgroupId.y * NUM_WORKGROUP_EACH_DIM + workgroupId.x;\n\
         \x20  uint partnerWorkgroupCoord  = partnerWorkgroupId.y * NUM_WORKGROUP_EACH_DIM + partnerWorkgroupId.x;\n\
         \x20  bool leader                 = gl_LocalInvocationID.x == {}u && gl_LocalInvocationID.y == {}u;\n",
        domain.leader.x, domain.leader.y
    )
}

/// GLSL prologue for subgroup mapping: bail when the mirrored lane is inactive.
pub const SUBGROUP_BAIL: &str = concat!(
    "   uvec4 ballot = subgroupBallot(true);\n",
    "   if (!subgroupBallotBitExtract(ballot, gl_SubgroupInvocationID^(gl_SubgroupSize-1))) { return; }\n",
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DomainConfig, TargetLimits};
    use std::collections::HashMap;

    fn domain(stage: Stage, dim: u32, groups: u32) -> InvocationDomain {
        DomainConfig::default()
            .with_dim(dim)
            .with_workgroups_per_dim(groups)
            .resolve(stage, &TargetLimits::default())
            .unwrap()
    }

    #[test]
    fn test_device_mirror_has_no_singletons_for_even_extent() {
        let d = domain(Stage::Compute, 31, 8);
        let id = InvocationId::Compute {
            workgroup: [0, 0],
            local: [0, 0],
        };
        match pair_invocation(&d, Scope::Device, 32, id) {
            Pairing::Paired { own, partner } => {
                assert_eq!(own.buffer, 0);
                assert_eq!(partner.buffer, d.invocation_count() - 1);
                assert_eq!(partner.image, [247, 247]);
                assert_eq!(partner.workgroup, [7, 7]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_workgroup_centre_is_singleton() {
        let d = domain(Stage::Compute, 5, 2);
        let id = InvocationId::Compute {
            workgroup: [1, 0],
            local: [2, 2],
        };
        assert!(matches!(
            pair_invocation(&d, Scope::Workgroup, 32, id),
            Pairing::Singleton { .. }
        ));
    }

    #[test]
    fn test_partial_subgroup_partner_inactive() {
        // 9 invocations per workgroup with subgroups of 4: lane 0 of the third
        // subgroup (linear 8) mirrors to linear 11, which does not exist.
        let d = domain(Stage::Compute, 3, 1);
        let id = InvocationId::Compute {
            workgroup: [0, 0],
            local: [2, 2],
        };
        assert_eq!(
            pair_invocation(&d, Scope::Subgroup, 4, id),
            Pairing::PartnerInactive
        );
        let first = InvocationId::Compute {
            workgroup: [0, 0],
            local: [0, 0],
        };
        let pairing = pair_invocation(&d, Scope::Subgroup, 4, first);
        assert_eq!(pairing.partner().map(|c| c.shared), Some(3));
    }

    #[test]
    fn test_mapping_falls_back_for_workgroup_storage() {
        let case = CaseDef {
            payload_storage: StorageClass::Workgroup,
            ..Default::default()
        };
        assert_eq!(mapping_scope(&case), Scope::Workgroup);
        assert_eq!(mapping_scope(&CaseDef::default()), Scope::Device);
    }

    #[test]
    fn test_partners_are_mutual_in_small_domain() {
        let d = domain(Stage::Fragment, 4, 3);
        let mut by_buffer = HashMap::new();
        for id in d.invocations() {
            let pairing = pair_invocation(&d, Scope::Device, 32, id);
            by_buffer.insert(pairing.own().unwrap().buffer, pairing);
        }
        for pairing in by_buffer.values() {
            let partner = pairing.partner().unwrap();
            let back = by_buffer[&partner.buffer].partner().unwrap();
            assert_eq!(back, pairing.own().unwrap());
        }
    }

    #[test]
    fn test_buffer_position_inverts_pairing_layout() {
        for stage in Stage::ALL {
            let d = domain(stage, 4, 3);
            for mapping in [Scope::Device, Scope::Workgroup, Scope::Subgroup] {
                for id in d.invocations() {
                    let Some(own) = pair_invocation(&d, mapping, 4, id).own() else {
                        continue;
                    };
                    assert_eq!(
                        buffer_position(&d, mapping, own.buffer),
                        d.global_position(id),
                        "{:?} {:?} slot {}",
                        stage,
                        mapping,
                        own.buffer
                    );
                }
            }
        }
    }

    #[test]
    fn test_buffer_position_of_second_tile() {
        // Slot 64 of an 8 × 8 × 2 × 2 domain opens the second tile.
        let d = domain(Stage::Compute, 8, 2);
        assert_eq!(buffer_position(&d, Scope::Workgroup, 64), [8, 0]);
        assert_eq!(buffer_position(&d, Scope::Device, 64), [0, 4]);
    }

    #[test]
    fn test_coordinate_source_mentions_required_names() {
        for mapping in Scope::ALL {
            for stage in Stage::ALL {
                let src = coordinate_source(mapping, stage);
                for name in [
                    "uint bufferCoord",
                    "uint partnerBufferCoord",
                    "ivec2 imageCoord",
                    "ivec2 partnerImageCoord",
                    "bool paired",
                ] {
                    assert!(src.contains(name), "{:?}/{:?} lacks {}", mapping, stage, name);
                }
            }
        }
        assert!(coordinate_source(Scope::Workgroup, Stage::Compute).contains("ivec2(DIM-1) - localId"));
        assert!(coordinate_source(Scope::Subgroup, Stage::Compute).contains("subgroupShuffleXor"));
    }

    #[test]
    fn test_transitive_source_uses_leader_policy() {
        let d = DomainConfig::default()
            .with_leader(3, 1)
            .resolve(Stage::Compute, &TargetLimits::default())
            .unwrap();
        let src = transitive_source(&d);
        assert!(src.contains("gl_LocalInvocationID.x == 3u && gl_LocalInvocationID.y == 1u"));
        assert!(src.contains("partnerWorkgroupCoord"));
    }
}

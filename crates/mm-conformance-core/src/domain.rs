//! Invocation domain: tile size, tile count, leader and dispatch shape.

use serde::{Deserialize, Serialize};

use mm_types::Stage;

use crate::config_space::LegalityRule;
use crate::errors::ConformanceError;

/// Default tile edge (`DIM`).
pub const DEFAULT_DIM: u32 = 31;
/// Default tiles per axis (`NUM_WORKGROUP_EACH_DIM`).
pub const DEFAULT_WORKGROUPS_PER_DIM: u32 = 8;

/// Which local coordinate acts as the per-workgroup leader in transitive tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderPolicy {
    pub x: u32,
    pub y: u32,
}

/// Limits of the execution target that shape the domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetLimits {
    pub max_workgroup_invocations: u32,
    pub subgroup_size: u32,
}

impl Default for TargetLimits {
    fn default() -> Self {
        Self {
            max_workgroup_invocations: 1024,
            subgroup_size: 32,
        }
    }
}

/// Requested domain, before target limits are applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub dim: u32,
    pub workgroups_per_dim: u32,
    pub leader: LeaderPolicy,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIM,
            workgroups_per_dim: DEFAULT_WORKGROUPS_PER_DIM,
            leader: LeaderPolicy::default(),
        }
    }
}

impl DomainConfig {
    pub fn with_dim(mut self, dim: u32) -> Self {
        self.dim = dim;
        self
    }

    pub fn with_workgroups_per_dim(mut self, workgroups: u32) -> Self {
        self.workgroups_per_dim = workgroups;
        self
    }

    pub fn with_leader(mut self, x: u32, y: u32) -> Self {
        self.leader = LeaderPolicy { x, y };
        self
    }

    /// Fit the request to `limits` for a program of `stage`.
    ///
    /// `dim` shrinks to `floor(sqrt(max_workgroup_invocations))` when a full
    /// tile does not fit in one workgroup.
    pub fn resolve(
        &self,
        stage: Stage,
        limits: &TargetLimits,
    ) -> Result<InvocationDomain, ConformanceError> {
        let mut dim = self.dim;
        if u64::from(dim) * u64::from(dim) > u64::from(limits.max_workgroup_invocations) {
            dim = isqrt(limits.max_workgroup_invocations);
            tracing::debug!(
                requested = self.dim,
                resolved = dim,
                max = limits.max_workgroup_invocations,
                "shrinking tile to fit workgroup limit"
            );
        }
        if dim == 0 || self.workgroups_per_dim == 0 {
            return Err(ConformanceError::ConfigurationInvalid {
                rule: LegalityRule::EmptyDomain,
            });
        }
        let too_large = || ConformanceError::ConfigurationInvalid {
            rule: LegalityRule::DomainTooLarge,
        };
        let extent = dim
            .checked_mul(self.workgroups_per_dim)
            .ok_or_else(too_large)?;
        extent.checked_mul(extent).ok_or_else(too_large)?;
        if self.leader.x >= dim || self.leader.y >= dim {
            return Err(ConformanceError::ConfigurationInvalid {
                rule: LegalityRule::LeaderOutsideWorkgroup,
            });
        }
        Ok(InvocationDomain {
            dim,
            workgroups_per_dim: self.workgroups_per_dim,
            stage,
            leader: self.leader,
        })
    }
}

fn isqrt(value: u32) -> u32 {
    let mut root = (f64::from(value)).sqrt() as u32;
    while u64::from(root) * u64::from(root) > u64::from(value) {
        root -= 1;
    }
    while u64::from(root + 1) * u64::from(root + 1) <= u64::from(value) {
        root += 1;
    }
    root
}

/// How the host launches the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DispatchShape {
    /// `groups × groups × 1` workgroups of `local × local` invocations.
    Workgroups { groups: u32, local: u32 },
    /// One point primitive per invocation.
    Points { count: u32 },
    /// A two-triangle strip covering a `width × height` framebuffer.
    FullscreenStrip { width: u32, height: u32 },
}

/// The built-in identifier of one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvocationId {
    Compute { workgroup: [u32; 2], local: [u32; 2] },
    Vertex { index: u32 },
    Fragment { x: u32, y: u32 },
}

/// A resolved invocation domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationDomain {
    pub dim: u32,
    pub workgroups_per_dim: u32,
    pub stage: Stage,
    pub leader: LeaderPolicy,
}

impl InvocationDomain {
    /// Edge of the square image / framebuffer: `dim · n`.
    pub fn extent(&self) -> u32 {
        self.dim * self.workgroups_per_dim
    }

    pub fn tile_invocations(&self) -> u32 {
        self.dim * self.dim
    }

    pub fn invocation_count(&self) -> u32 {
        self.extent() * self.extent()
    }

    pub fn workgroup_count(&self) -> u32 {
        self.workgroups_per_dim * self.workgroups_per_dim
    }

    pub fn dispatch_shape(&self) -> DispatchShape {
        match self.stage {
            Stage::Compute => DispatchShape::Workgroups {
                groups: self.workgroups_per_dim,
                local: self.dim,
            },
            Stage::Vertex => DispatchShape::Points {
                count: self.invocation_count(),
            },
            Stage::Fragment => DispatchShape::FullscreenStrip {
                width: self.extent(),
                height: self.extent(),
            },
        }
    }

    /// Every invocation identifier, workgroup-major for compute.
    pub fn invocations(&self) -> impl Iterator<Item = InvocationId> + '_ {
        let count = self.invocation_count();
        (0..count).map(move |i| self.invocation_at(i))
    }

    fn invocation_at(&self, i: u32) -> InvocationId {
        let extent = self.extent();
        match self.stage {
            Stage::Compute => {
                let tile = self.tile_invocations();
                let group = i / tile;
                let local = i % tile;
                InvocationId::Compute {
                    workgroup: [group % self.workgroups_per_dim, group / self.workgroups_per_dim],
                    local: [local % self.dim, local / self.dim],
                }
            }
            Stage::Vertex => InvocationId::Vertex { index: i },
            Stage::Fragment => InvocationId::Fragment {
                x: i % extent,
                y: i / extent,
            },
        }
    }

    /// Position of the invocation in the `extent × extent` plane.
    pub fn global_position(&self, id: InvocationId) -> [u32; 2] {
        match id {
            InvocationId::Compute { workgroup, local } => [
                workgroup[0] * self.dim + local[0],
                workgroup[1] * self.dim + local[1],
            ],
            InvocationId::Vertex { index } => [index % self.extent(), index / self.extent()],
            InvocationId::Fragment { x, y } => [x, y],
        }
    }

    /// Tile (workgroup) and local position of a global position.
    pub fn split(&self, global: [u32; 2]) -> ([u32; 2], [u32; 2]) {
        (
            [global[0] / self.dim, global[1] / self.dim],
            [global[0] % self.dim, global[1] % self.dim],
        )
    }

    /// Linear index of the tile an invocation belongs to; the scheduling unit.
    pub fn group_of(&self, id: InvocationId) -> u32 {
        let (tile, _) = self.split(self.global_position(id));
        tile[1] * self.workgroups_per_dim + tile[0]
    }

    pub fn is_leader(&self, id: InvocationId) -> bool {
        let (_, local) = self.split(self.global_position(id));
        local == [self.leader.x, self.leader.y]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_domain_shape() {
        let domain = DomainConfig::default()
            .resolve(Stage::Compute, &TargetLimits::default())
            .unwrap();
        assert_eq!(domain.extent(), 248);
        assert_eq!(domain.invocation_count(), 31 * 31 * 8 * 8);
        assert_eq!(
            domain.dispatch_shape(),
            DispatchShape::Workgroups {
                groups: 8,
                local: 31
            }
        );
    }

    #[test]
    fn test_dim_shrinks_to_workgroup_limit() {
        let limits = TargetLimits {
            max_workgroup_invocations: 256,
            subgroup_size: 32,
        };
        let domain = DomainConfig::default()
            .resolve(Stage::Compute, &limits)
            .unwrap();
        assert_eq!(domain.dim, 16);

        let odd = TargetLimits {
            max_workgroup_invocations: 300,
            subgroup_size: 32,
        };
        let domain = DomainConfig::default().resolve(Stage::Compute, &odd).unwrap();
        assert_eq!(domain.dim, 17);
    }

    #[test]
    fn test_leader_outside_tile_is_rejected() {
        let err = DomainConfig::default()
            .with_dim(4)
            .with_leader(4, 0)
            .resolve(Stage::Compute, &TargetLimits::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ConformanceError::ConfigurationInvalid {
                rule: LegalityRule::LeaderOutsideWorkgroup
            }
        ));
    }

    #[test]
    fn test_overflowing_domain_is_rejected() {
        for workgroups in [70_000, u32::MAX] {
            let err = DomainConfig::default()
                .with_workgroups_per_dim(workgroups)
                .resolve(Stage::Compute, &TargetLimits::default())
                .unwrap_err();
            assert!(matches!(
                err,
                ConformanceError::ConfigurationInvalid {
                    rule: LegalityRule::DomainTooLarge
                }
            ));
        }

        // 31 * 2113 = 65503 and 65503² still fits in a u32.
        let largest = DomainConfig::default()
            .with_workgroups_per_dim(2113)
            .resolve(Stage::Compute, &TargetLimits::default())
            .unwrap();
        assert_eq!(largest.invocation_count(), 65_503 * 65_503);
    }

    #[test]
    fn test_invocations_cover_plane_once() {
        for stage in [Stage::Compute, Stage::Vertex, Stage::Fragment] {
            let domain = DomainConfig::default()
                .with_dim(3)
                .with_workgroups_per_dim(2)
                .resolve(stage, &TargetLimits::default())
                .unwrap();
            let mut seen = vec![false; domain.invocation_count() as usize];
            for id in domain.invocations() {
                let [x, y] = domain.global_position(id);
                let slot = (y * domain.extent() + x) as usize;
                assert!(!seen[slot]);
                seen[slot] = true;
            }
            assert!(seen.iter().all(|s| *s));
        }
    }

    #[test]
    fn test_fragment_and_vertex_shapes() {
        let limits = TargetLimits::default();
        let frag = DomainConfig::default().resolve(Stage::Fragment, &limits).unwrap();
        assert_eq!(
            frag.dispatch_shape(),
            DispatchShape::FullscreenStrip {
                width: 248,
                height: 248
            }
        );
        let vert = DomainConfig::default().resolve(Stage::Vertex, &limits).unwrap();
        assert_eq!(vert.dispatch_shape(), DispatchShape::Points { count: 61504 });
    }
}

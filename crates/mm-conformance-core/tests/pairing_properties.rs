//! Involution and totality of the pairing function over every scope and stage.

use std::collections::HashMap;

use mm_conformance_core::domain::{DomainConfig, InvocationDomain, TargetLimits};
use mm_conformance_core::pairing::{pair_invocation, Pairing};
use mm_types::{Scope, Stage};

fn domains() -> Vec<InvocationDomain> {
    let mut out = Vec::new();
    for stage in Stage::ALL {
        for (dim, groups) in [(4, 2), (5, 3), (7, 2)] {
            out.push(
                DomainConfig::default()
                    .with_dim(dim)
                    .with_workgroups_per_dim(groups)
                    .resolve(stage, &TargetLimits::default())
                    .unwrap(),
            );
        }
    }
    out
}

fn scopes_for(stage: Stage) -> Vec<Scope> {
    Scope::ALL
        .into_iter()
        .filter(|scope| stage == Stage::Compute || *scope != Scope::Workgroup)
        .collect()
}

/// Pairings keyed by the own buffer coordinate, which is unique per invocation.
fn pairings(domain: &InvocationDomain, scope: Scope, subgroup_size: u32) -> (HashMap<u32, Pairing>, usize) {
    let mut by_buffer = HashMap::new();
    let mut inactive = 0;
    for id in domain.invocations() {
        let pairing = pair_invocation(domain, scope, subgroup_size, id);
        match pairing.own() {
            Some(own) => {
                assert!(
                    by_buffer.insert(own.buffer, pairing).is_none(),
                    "buffer coordinate {} reused",
                    own.buffer
                );
            }
            None => inactive += 1,
        }
    }
    (by_buffer, inactive)
}

#[test]
fn test_partner_of_partner_is_self() {
    for domain in domains() {
        for scope in scopes_for(domain.stage) {
            for subgroup_size in [4, 32] {
                let (by_buffer, _) = pairings(&domain, scope, subgroup_size);
                for pairing in by_buffer.values() {
                    let own = pairing.own().unwrap();
                    let partner = pairing.partner().unwrap();
                    let back = by_buffer
                        .get(&partner.buffer)
                        .unwrap_or_else(|| panic!("{:?}: partner {} inactive", scope, partner.buffer));
                    assert_eq!(
                        back.partner().unwrap(),
                        own,
                        "{:?} {:?} dim {}",
                        scope,
                        domain.stage,
                        domain.dim
                    );
                }
            }
        }
    }
}

#[test]
fn test_pairs_partition_the_domain() {
    for domain in domains() {
        for scope in scopes_for(domain.stage) {
            let (by_buffer, inactive) = pairings(&domain, scope, 8);
            let mut claimed: HashMap<u32, u32> = HashMap::new();
            let mut singletons = 0;
            for pairing in by_buffer.values() {
                match pairing {
                    Pairing::Paired { own, partner } => {
                        assert_ne!(own.buffer, partner.buffer);
                        *claimed.entry(partner.buffer).or_default() += 1;
                    }
                    Pairing::Singleton { .. } => singletons += 1,
                    Pairing::PartnerInactive => unreachable!(),
                }
            }
            // Every paired invocation is somebody's partner exactly once.
            assert!(claimed.values().all(|count| *count == 1));
            assert_eq!(claimed.len() + singletons, by_buffer.len());
            assert_eq!(
                by_buffer.len() + inactive,
                domain.invocation_count() as usize
            );
        }
    }
}

#[test]
fn test_singletons_only_at_odd_mirror_centres() {
    let even = DomainConfig::default()
        .with_dim(4)
        .with_workgroups_per_dim(2)
        .resolve(Stage::Compute, &TargetLimits::default())
        .unwrap();
    let (by_buffer, _) = pairings(&even, Scope::Workgroup, 32);
    assert!(by_buffer
        .values()
        .all(|p| matches!(p, Pairing::Paired { .. })));

    let odd = DomainConfig::default()
        .with_dim(5)
        .with_workgroups_per_dim(3)
        .resolve(Stage::Compute, &TargetLimits::default())
        .unwrap();
    let (by_buffer, _) = pairings(&odd, Scope::Workgroup, 32);
    let singletons = by_buffer
        .values()
        .filter(|p| matches!(p, Pairing::Singleton { .. }))
        .count();
    assert_eq!(singletons, odd.workgroup_count() as usize);

    let (by_buffer, _) = pairings(&odd, Scope::Device, 32);
    let singletons = by_buffer
        .values()
        .filter(|p| matches!(p, Pairing::Singleton { .. }))
        .count();
    assert_eq!(singletons, 1);
}

#[test]
fn test_workgroup_partners_stay_in_tile() {
    for domain in domains()
        .into_iter()
        .filter(|d| d.stage == Stage::Compute)
    {
        let (by_buffer, _) = pairings(&domain, Scope::Workgroup, 32);
        for pairing in by_buffer.values() {
            let own = pairing.own().unwrap();
            let partner = pairing.partner().unwrap();
            assert_eq!(own.workgroup, partner.workgroup);
        }
    }
}

//! Rule 1: CIDR overlap detection.
//!
//! Segment address spaces (and VPN client pools, which are routed into the
//! same space) must be disjoint; sibling subnets must be disjoint and sit
//! inside their segment.

use super::{Rule, Violation};
use crate::models::{num_az_hosts, Cidr, ResourceKey, ResourceKind, MIN_SUBNET_MASK};
use crate::topology::TopologyModel;
use itertools::Itertools;

/// Every pair of overlapping blocks, found with a sort and one sweep.
///
/// Blocks are ordered by their low address; an active list holds the blocks
/// whose range still reaches the current position, so each overlap is found
/// exactly once.
pub fn overlapping_pairs<T: Clone>(blocks: &[(Cidr, T)]) -> Vec<(T, T)> {
    let mut pairs = Vec::new();
    let mut active: Vec<(u32, usize)> = Vec::new();

    let ordered = blocks
        .iter()
        .enumerate()
        .sorted_by_key(|(_, (cidr, _))| cidr.interval());

    for (i, (cidr, _)) in ordered {
        let (lo, hi) = cidr.interval();
        active.retain(|&(active_hi, _)| active_hi >= lo);
        for &(_, j) in &active {
            pairs.push((blocks[j].1.clone(), blocks[i].1.clone()));
        }
        active.push((hi, i));
    }
    pairs
}

pub(super) fn check(model: &TopologyModel, out: &mut Vec<Violation>) {
    // Address spaces and client pools.
    let mut blocks: Vec<(Cidr, ResourceKey)> = Vec::new();
    for segment in model.segments() {
        let key = ResourceKey::segment(&segment.id);
        check_aligned(&segment.address_space, &key, "address space", out);
        blocks.push((segment.address_space, key));
    }
    for gateway in model.gateways() {
        let key = ResourceKey::new(ResourceKind::VpnGateway, &gateway.id);
        check_aligned(&gateway.client_address_pool, &key, "client address pool", out);
        blocks.push((gateway.client_address_pool, key));
    }
    for (a, b) in overlapping_pairs(&blocks) {
        let cidr_of = |k: &ResourceKey| {
            blocks
                .iter()
                .find(|(_, key)| key == k)
                .map(|(c, _)| c.to_string())
                .unwrap_or_default()
        };
        out.push(Violation::error(
            Rule::Cidr,
            vec![a.clone(), b.clone()],
            format!(
                "{a} [{}] overlaps {b} [{}]",
                cidr_of(&a),
                cidr_of(&b)
            ),
        ));
    }

    // Subnets within each segment.
    for segment in model.segments() {
        let mut siblings: Vec<(Cidr, ResourceKey)> = Vec::new();
        for subnet in &segment.subnets {
            let key = ResourceKey::subnet(&segment.id, &subnet.name);
            check_aligned(&subnet.prefix, &key, "prefix", out);
            if num_az_hosts(subnet.prefix.mask).is_err() {
                out.push(Violation::error(
                    Rule::Cidr,
                    vec![key.clone()],
                    format!(
                        "{key} prefix {} is smaller than the minimum /{MIN_SUBNET_MASK}",
                        subnet.prefix
                    ),
                ));
            }
            if !segment.address_space.contains_net(&subnet.prefix) {
                out.push(Violation::error(
                    Rule::Cidr,
                    vec![key.clone(), ResourceKey::segment(&segment.id)],
                    format!(
                        "{key} prefix {} is outside segment '{}' address space {}",
                        subnet.prefix, segment.id, segment.address_space
                    ),
                ));
            }
            siblings.push((subnet.prefix, key));
        }
        for (a, b) in overlapping_pairs(&siblings) {
            out.push(Violation::error(
                Rule::Cidr,
                vec![a.clone(), b.clone()],
                format!("{a} overlaps sibling {b} in segment '{}'", segment.id),
            ));
        }
    }
}

fn check_aligned(cidr: &Cidr, key: &ResourceKey, what: &str, out: &mut Vec<Violation>) {
    if !cidr.is_aligned() {
        out.push(Violation::error(
            Rule::Cidr,
            vec![key.clone()],
            format!(
                "{key} {what} {cidr} is not a network address (expected {}/{})",
                cidr.lo(),
                cidr.mask
            ),
        ));
    }
}

//! Rule 2: peering symmetry and exclusive gateway-transit direction.
//!
//! On a transit pair the hub side sets `allowGatewayTransit` only and the
//! spoke side sets `useRemoteGateways` only.

use super::{Rule, Violation};
use crate::models::{Peering, ResourceKey, ResourceKind};
use crate::topology::TopologyModel;
use std::collections::HashMap;

fn key(p: &Peering) -> ResourceKey {
    ResourceKey::new(ResourceKind::Peering, &p.id)
}

pub(super) fn check(model: &TopologyModel, out: &mut Vec<Violation>) {
    let mut remote_gateway_users: HashMap<&str, Vec<&Peering>> = HashMap::new();

    for p in model.peerings() {
        if p.local_segment == p.remote_segment {
            out.push(Violation::error(
                Rule::PeeringSymmetry,
                vec![key(p)],
                format!("peering '{}' peers segment '{}' with itself", p.id, p.local_segment),
            ));
            continue;
        }

        if p.allow_gateway_transit && p.use_remote_gateways {
            out.push(Violation::error(
                Rule::PeeringSymmetry,
                vec![key(p)],
                format!(
                    "peering '{}' sets both allowGatewayTransit and useRemoteGateways",
                    p.id
                ),
            ));
        }

        let reverse = model.peering_between(&p.remote_segment, &p.local_segment);

        if p.allow_gateway_transit {
            check_transit_provider(model, p, reverse, out);
        }
        if p.use_remote_gateways {
            remote_gateway_users
                .entry(p.local_segment.as_str())
                .or_default()
                .push(p);
            check_transit_consumer(model, p, reverse, out);
        }

        if reverse.is_none() && !p.allow_gateway_transit && !p.use_remote_gateways {
            out.push(Violation::warning(
                Rule::PeeringSymmetry,
                vec![key(p)],
                format!(
                    "peering '{}' has no reverse peering from '{}' and will stay Initiated",
                    p.id, p.remote_segment
                ),
            ));
        }
    }

    let mut users: Vec<_> = remote_gateway_users.into_iter().collect();
    users.sort_by_key(|(segment, _)| *segment);
    for (segment, peerings) in users {
        if peerings.len() > 1 {
            out.push(Violation::error(
                Rule::PeeringSymmetry,
                peerings.iter().map(|p| key(p)).collect(),
                format!(
                    "segment '{segment}' uses remote gateways over {} peerings; at most one is allowed",
                    peerings.len()
                ),
            ));
        }
    }
}

fn check_transit_provider(
    model: &TopologyModel,
    p: &Peering,
    reverse: Option<&Peering>,
    out: &mut Vec<Violation>,
) {
    match reverse {
        None => out.push(Violation::error(
            Rule::PeeringSymmetry,
            vec![key(p)],
            format!(
                "peering '{}' allows gateway transit but there is no reverse peering from '{}' using remote gateways",
                p.id, p.remote_segment
            ),
        )),
        Some(r) if !r.use_remote_gateways => out.push(Violation::error(
            Rule::PeeringSymmetry,
            vec![key(p), key(r)],
            format!(
                "asymmetric gateway transit: '{}' allows gateway transit but reverse peering '{}' has useRemoteGateways=false",
                p.id, r.id
            ),
        )),
        Some(r) if r.allow_gateway_transit => out.push(Violation::error(
            Rule::PeeringSymmetry,
            vec![key(p), key(r)],
            format!(
                "both '{}' and '{}' offer gateway transit; only the gateway side may",
                p.id, r.id
            ),
        )),
        Some(_) => {}
    }

    if model.gateway_in(&p.local_segment).is_none() {
        out.push(Violation::warning(
            Rule::PeeringSymmetry,
            vec![key(p)],
            format!(
                "peering '{}' allows gateway transit but segment '{}' has no VPN gateway",
                p.id, p.local_segment
            ),
        ));
    }
}

fn check_transit_consumer(
    model: &TopologyModel,
    p: &Peering,
    reverse: Option<&Peering>,
    out: &mut Vec<Violation>,
) {
    match reverse {
        Some(r) if r.allow_gateway_transit => {}
        Some(r) => out.push(Violation::error(
            Rule::PeeringSymmetry,
            vec![key(p), key(r)],
            format!(
                "asymmetric gateway transit: '{}' uses remote gateways but reverse peering '{}' has allowGatewayTransit=false",
                p.id, r.id
            ),
        )),
        None => out.push(Violation::error(
            Rule::PeeringSymmetry,
            vec![key(p)],
            format!(
                "peering '{}' uses remote gateways but there is no reverse peering from '{}'",
                p.id, p.remote_segment
            ),
        )),
    }

    if model.gateway_in(&p.remote_segment).is_none() {
        out.push(Violation::error(
            Rule::PeeringSymmetry,
            vec![key(p), ResourceKey::segment(&p.remote_segment)],
            format!(
                "peering '{}' uses remote gateways but segment '{}' has no VPN gateway",
                p.id, p.remote_segment
            ),
        ));
    }
}

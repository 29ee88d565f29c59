//! Rule 3: private DNS zone resolution completeness and resolver placement.
//!
//! A zone only resolves from segments it is linked to. When a spoke forwards
//! queries to a hub resolver, the hub is the one asking, so the hub needs a
//! link too even if the zone's records live elsewhere.

use super::{Rule, Violation};
use crate::models::{ResourceKey, ResourceKind, DELEGATION_DNS_RESOLVER};
use crate::topology::TopologyModel;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

pub(super) fn check(model: &TopologyModel, out: &mut Vec<Violation>) {
    check_zone_links(model, out);
    check_resolvers(model, out);
    check_resolver_consumers(model, out);
}

fn zone_key(name: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::DnsZone, name)
}

fn resolver_key(id: &str) -> ResourceKey {
    ResourceKey::new(ResourceKind::DnsResolver, id)
}

fn check_zone_links(model: &TopologyModel, out: &mut Vec<Violation>) {
    for segment in model.segments() {
        let resolver_hubs: Vec<&str> = model
            .resolvers_used_by(&segment.id)
            .iter()
            .map(|r| r.segment.as_str())
            .filter(|hub| *hub != segment.id)
            .collect();

        for zone in model.zones_required_by(&segment.id) {
            if !zone.is_linked_to(&segment.id) {
                out.push(Violation::error(
                    Rule::DnsCompleteness,
                    vec![zone_key(&zone.name), ResourceKey::segment(&segment.id)],
                    format!(
                        "zone '{}' is not linked to segment '{}' whose workloads resolve it",
                        zone.name, segment.id
                    ),
                ));
            }
            for hub in &resolver_hubs {
                if !zone.is_linked_to(hub) {
                    out.push(Violation::error(
                        Rule::DnsCompleteness,
                        vec![zone_key(&zone.name), ResourceKey::segment(hub)],
                        format!(
                            "zone '{}' is missing a link to hub '{hub}' whose DNS resolver answers queries for segment '{}'",
                            zone.name, segment.id
                        ),
                    ));
                }
            }
        }
    }
}

fn check_resolvers(model: &TopologyModel, out: &mut Vec<Violation>) {
    let mut per_segment: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for resolver in model.resolvers() {
        per_segment
            .entry(resolver.segment.as_str())
            .or_default()
            .push(resolver.id.as_str());

        let key = resolver_key(&resolver.id);
        let Some(segment) = model.segment(&resolver.segment) else {
            continue;
        };
        if !segment.is_hub() {
            out.push(Violation::error(
                Rule::DnsCompleteness,
                vec![key.clone(), ResourceKey::segment(&segment.id)],
                format!(
                    "resolver '{}' is placed in spoke segment '{}'; shared resolvers belong in a hub",
                    resolver.id, segment.id
                ),
            ));
        }
        let Some(subnet) = segment.subnet(&resolver.subnet) else {
            continue;
        };
        let subnet_key = ResourceKey::subnet(&segment.id, &subnet.name);
        if subnet.delegation.as_deref() != Some(DELEGATION_DNS_RESOLVER) {
            out.push(Violation::error(
                Rule::DnsCompleteness,
                vec![key.clone(), subnet_key.clone()],
                format!(
                    "resolver '{}' subnet '{}' is not delegated to {DELEGATION_DNS_RESOLVER}",
                    resolver.id, subnet.name
                ),
            ));
        }
        let ip = resolver.inbound_endpoint_ip;
        if !subnet.prefix.contains(ip) {
            out.push(Violation::error(
                Rule::DnsCompleteness,
                vec![key.clone(), subnet_key],
                format!(
                    "resolver '{}' inbound IP {ip} is outside subnet '{}' {}",
                    resolver.id, subnet.name, subnet.prefix
                ),
            ));
        } else if is_reserved(ip, subnet.prefix.lo(), subnet.prefix.hi()) {
            out.push(Violation::error(
                Rule::DnsCompleteness,
                vec![key, subnet_key],
                format!(
                    "resolver '{}' inbound IP {ip} is a reserved address of subnet '{}' {}",
                    resolver.id, subnet.name, subnet.prefix
                ),
            ));
        }
    }

    for (segment, resolvers) in per_segment {
        if resolvers.len() > 1 {
            out.push(Violation::error(
                Rule::DnsCompleteness,
                resolvers.iter().map(|id| resolver_key(id)).collect(),
                format!(
                    "segment '{segment}' hosts {} resolvers ({}); exactly one may be authoritative per hub",
                    resolvers.len(),
                    resolvers.join(", ")
                ),
            ));
        }
    }
}

/// The provider keeps the first four addresses and the broadcast address.
fn is_reserved(ip: Ipv4Addr, lo: Ipv4Addr, hi: Ipv4Addr) -> bool {
    let offset = u32::from(ip) - u32::from(lo);
    offset < 4 || ip == hi
}

fn check_resolver_consumers(model: &TopologyModel, out: &mut Vec<Violation>) {
    for segment in model.segments() {
        let Some(resolver) = model.resolvers_used_by(&segment.id).into_iter().next() else {
            continue;
        };
        let first = segment.dns_servers.first().copied();
        if first != Some(resolver.inbound_endpoint_ip) {
            out.push(Violation::error(
                Rule::DnsCompleteness,
                vec![ResourceKey::segment(&segment.id), resolver_key(&resolver.id)],
                format!(
                    "segment '{}' uses resolver '{}' ({}) but lists {} first in dnsServers",
                    segment.id,
                    resolver.id,
                    resolver.inbound_endpoint_ip,
                    first.map(|ip| ip.to_string()).unwrap_or_default()
                ),
            ));
        }
    }
}

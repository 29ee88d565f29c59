//! In-memory topology graph.
//!
//! Entities live in per-kind vectors; relationships are ids resolved through
//! index maps, so segments never own peerings and there are no cycles.

use super::TopologyDocument;
use crate::error::MalformedTopologyError;
use crate::models::{
    DnsResolver, NetworkSegment, Peering, PrivateDnsZone, Resource, ResourceKey, SegmentSpec,
    SubnetSpec, VpnGateway,
};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::net::Ipv4Addr;

#[derive(Debug, Clone)]
pub struct TopologyModel {
    topology_id: String,
    segments: Vec<NetworkSegment>,
    segment_index: HashMap<String, usize>,
    peerings: Vec<Peering>,
    /// Segment id -> indexes of peerings touching it (either direction).
    peerings_by_segment: HashMap<String, Vec<usize>>,
    zones: Vec<PrivateDnsZone>,
    zone_index: HashMap<String, usize>,
    resolvers: Vec<DnsResolver>,
    gateways: Vec<VpnGateway>,
}

impl TopologyModel {
    /// Build the graph, rejecting unknown references and duplicate ids.
    pub fn build(doc: TopologyDocument) -> Result<Self, MalformedTopologyError> {
        let TopologyDocument {
            topology_id,
            segments,
            peerings,
            dns_zones,
            dns_resolvers,
            vpn_gateways,
        } = doc;

        let segment_index = index_unique(&segments, "segment", |s| &s.id)?;
        for segment in &segments {
            index_unique(&segment.subnets, "subnet", |s| &s.name).map_err(|_| {
                MalformedTopologyError::DuplicateId {
                    kind: "subnet",
                    id: format!("{}/{}", segment.id, duplicate_name(&segment.subnets)),
                }
            })?;
        }
        let zone_index = index_unique(&dns_zones, "dnsZone", |z| &z.name)?;
        index_unique(&peerings, "peering", |p| &p.id)?;
        index_unique(&dns_resolvers, "dnsResolver", |r| &r.id)?;
        index_unique(&vpn_gateways, "vpnGateway", |g| &g.id)?;

        let segment_known = |entity: String, id: &str| -> Result<(), MalformedTopologyError> {
            if segment_index.contains_key(id) {
                Ok(())
            } else {
                Err(MalformedTopologyError::UnknownReference {
                    entity,
                    target_kind: "segment",
                    target: id.to_string(),
                })
            }
        };

        let mut peerings_by_segment: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, p) in peerings.iter().enumerate() {
            segment_known(format!("peering '{}'", p.id), &p.local_segment)?;
            segment_known(format!("peering '{}'", p.id), &p.remote_segment)?;
            peerings_by_segment
                .entry(p.local_segment.clone())
                .or_default()
                .push(i);
            if p.remote_segment != p.local_segment {
                peerings_by_segment
                    .entry(p.remote_segment.clone())
                    .or_default()
                    .push(i);
            }
        }

        for zone in &dns_zones {
            for linked in &zone.linked_segments {
                segment_known(format!("dnsZone '{}'", zone.name), linked)?;
            }
        }

        for segment in &segments {
            for workload in &segment.workloads {
                for zone in &workload.zones {
                    if !zone_index.contains_key(zone) {
                        return Err(MalformedTopologyError::UnknownReference {
                            entity: format!("workload '{}' in segment '{}'", workload.name, segment.id),
                            target_kind: "dnsZone",
                            target: zone.clone(),
                        });
                    }
                }
            }
        }

        let subnet_known = |entity: String,
                            segment_id: &str,
                            subnet: &str|
         -> Result<(), MalformedTopologyError> {
            segment_known(entity.clone(), segment_id)?;
            let segment = &segments[segment_index[segment_id]];
            if segment.subnet(subnet).is_some() {
                Ok(())
            } else {
                Err(MalformedTopologyError::UnknownReference {
                    entity,
                    target_kind: "subnet",
                    target: format!("{segment_id}/{subnet}"),
                })
            }
        };
        for r in &dns_resolvers {
            subnet_known(format!("dnsResolver '{}'", r.id), &r.segment, &r.subnet)?;
        }
        for g in &vpn_gateways {
            subnet_known(format!("vpnGateway '{}'", g.id), &g.segment, &g.subnet)?;
        }

        log::debug!(
            "Built topology model '{topology_id}': {} segments, {} peerings, {} zones, {} resolvers, {} gateways",
            segments.len(),
            peerings.len(),
            dns_zones.len(),
            dns_resolvers.len(),
            vpn_gateways.len()
        );

        Ok(TopologyModel {
            topology_id,
            segments,
            segment_index,
            peerings,
            peerings_by_segment,
            zones: dns_zones,
            zone_index,
            resolvers: dns_resolvers,
            gateways: vpn_gateways,
        })
    }

    pub fn topology_id(&self) -> &str {
        &self.topology_id
    }

    pub fn segments(&self) -> &[NetworkSegment] {
        &self.segments
    }

    pub fn segment(&self, id: &str) -> Option<&NetworkSegment> {
        self.segment_index.get(id).map(|&i| &self.segments[i])
    }

    pub fn peerings(&self) -> &[Peering] {
        &self.peerings
    }

    /// Peerings with `segment_id` on either end.
    pub fn peerings_of(&self, segment_id: &str) -> Vec<&Peering> {
        self.peerings_by_segment
            .get(segment_id)
            .map(|idx| idx.iter().map(|&i| &self.peerings[i]).collect())
            .unwrap_or_default()
    }

    /// The peering from `local` to `remote`, if declared.
    pub fn peering_between(&self, local: &str, remote: &str) -> Option<&Peering> {
        self.peerings_of(local)
            .into_iter()
            .find(|p| p.local_segment == local && p.remote_segment == remote)
    }

    pub fn zones(&self) -> &[PrivateDnsZone] {
        &self.zones
    }

    pub fn zone(&self, name: &str) -> Option<&PrivateDnsZone> {
        self.zone_index.get(name).map(|&i| &self.zones[i])
    }

    /// Zones referenced by any workload inside the segment, in name order.
    pub fn zones_required_by(&self, segment_id: &str) -> Vec<&PrivateDnsZone> {
        let Some(segment) = self.segment(segment_id) else {
            return vec![];
        };
        let names: BTreeSet<&str> = segment
            .workloads
            .iter()
            .flat_map(|w| w.zones.iter().map(String::as_str))
            .collect();
        names.into_iter().filter_map(|n| self.zone(n)).collect()
    }

    pub fn resolvers(&self) -> &[DnsResolver] {
        &self.resolvers
    }

    pub fn resolver_by_ip(&self, ip: Ipv4Addr) -> Option<&DnsResolver> {
        self.resolvers.iter().find(|r| r.inbound_endpoint_ip == ip)
    }

    /// Resolvers whose inbound IP appears in the segment's DNS servers.
    pub fn resolvers_used_by(&self, segment_id: &str) -> Vec<&DnsResolver> {
        let Some(segment) = self.segment(segment_id) else {
            return vec![];
        };
        segment
            .dns_servers
            .iter()
            .filter_map(|ip| self.resolver_by_ip(*ip))
            .collect()
    }

    pub fn gateways(&self) -> &[VpnGateway] {
        &self.gateways
    }

    pub fn gateway_in(&self, segment_id: &str) -> Option<&VpnGateway> {
        self.gateways.iter().find(|g| g.segment == segment_id)
    }

    /// Every declared entity flattened into provider resources.
    pub fn resources(&self) -> BTreeMap<ResourceKey, Resource> {
        let mut out = BTreeMap::new();
        let mut push = |r: Resource| {
            out.insert(r.key(), r);
        };
        for s in &self.segments {
            push(Resource::Segment(SegmentSpec {
                id: s.id.clone(),
                name: s.name.clone(),
                role: s.role,
                address_space: s.address_space,
                dns_servers: s.dns_servers.clone(),
            }));
            for subnet in &s.subnets {
                push(Resource::Subnet(SubnetSpec {
                    segment: s.id.clone(),
                    name: subnet.name.clone(),
                    prefix: subnet.prefix,
                    delegation: subnet.delegation.clone(),
                    nsg_ref: subnet.nsg_ref.clone(),
                }));
            }
        }
        for p in &self.peerings {
            push(Resource::Peering(p.clone()));
        }
        for z in &self.zones {
            push(Resource::DnsZone(z.clone()));
        }
        for r in &self.resolvers {
            push(Resource::DnsResolver(r.clone()));
        }
        for g in &self.gateways {
            push(Resource::VpnGateway(g.clone()));
        }
        out
    }
}

fn index_unique<T>(
    items: &[T],
    kind: &'static str,
    id: impl Fn(&T) -> &String,
) -> Result<HashMap<String, usize>, MalformedTopologyError> {
    let mut index = HashMap::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        if index.insert(id(item).clone(), i).is_some() {
            return Err(MalformedTopologyError::DuplicateId {
                kind,
                id: id(item).clone(),
            });
        }
    }
    Ok(index)
}

fn duplicate_name(subnets: &[crate::models::Subnet]) -> String {
    let mut seen = HashSet::new();
    subnets
        .iter()
        .find(|s| !seen.insert(s.name.as_str()))
        .map(|s| s.name.clone())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceKind;

    fn lab() -> TopologyDocument {
        TopologyDocument::load("tests/data/topology_lab.json").expect("Error reading lab topology")
    }

    #[test]
    fn test_build_lab_model() {
        let model = TopologyModel::build(lab()).expect("lab topology is well formed");
        assert_eq!(model.topology_id(), "lab");
        assert_eq!(model.segments().len(), 2);
        assert_eq!(model.peerings_of("hub").len(), 2);
        assert_eq!(model.peerings_of("spoke-lab").len(), 2);
        assert!(model.peering_between("hub", "spoke-lab").is_some());
        assert!(model.gateway_in("hub").is_some());
        assert!(model.gateway_in("spoke-lab").is_none());
    }

    #[test]
    fn test_zones_required_by() {
        let model = TopologyModel::build(lab()).unwrap();
        let zones: Vec<&str> = model
            .zones_required_by("spoke-lab")
            .iter()
            .map(|z| z.name.as_str())
            .collect();
        assert_eq!(zones, vec!["contoso.internal"]);
        assert!(model.zones_required_by("hub").is_empty());
        assert!(model.zones_required_by("unknown").is_empty());
    }

    #[test]
    fn test_resolvers_used_by_spoke() {
        let model = TopologyModel::build(lab()).unwrap();
        let used = model.resolvers_used_by("spoke-lab");
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].segment, "hub");
    }

    #[test]
    fn test_unknown_peering_segment_is_malformed() {
        let mut doc = lab();
        doc.peerings[0].remote_segment = "spoke-demo".to_string();
        let err = TopologyModel::build(doc).unwrap_err();
        assert_eq!(
            err,
            MalformedTopologyError::UnknownReference {
                entity: "peering 'hub-to-lab'".to_string(),
                target_kind: "segment",
                target: "spoke-demo".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_gateway_subnet_is_malformed() {
        let mut doc = lab();
        doc.vpn_gateways[0].subnet = "snet-missing".to_string();
        let err = TopologyModel::build(doc).unwrap_err();
        assert!(err.to_string().contains("hub/snet-missing"), "{err}");
    }

    #[test]
    fn test_unknown_workload_zone_is_malformed() {
        let mut doc = lab();
        doc.segments[1].workloads[0].zones.push("privatelink.blob.core.windows.net".to_string());
        assert!(matches!(
            TopologyModel::build(doc),
            Err(MalformedTopologyError::UnknownReference {
                target_kind: "dnsZone",
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_ids_are_malformed() {
        let mut doc = lab();
        let dup = doc.segments[0].clone();
        doc.segments.push(dup);
        assert_eq!(
            TopologyModel::build(doc).unwrap_err(),
            MalformedTopologyError::DuplicateId {
                kind: "segment",
                id: "hub".to_string()
            }
        );

        let mut doc = lab();
        let dup = doc.segments[0].subnets[0].clone();
        doc.segments[0].subnets.push(dup);
        assert_eq!(
            TopologyModel::build(doc).unwrap_err(),
            MalformedTopologyError::DuplicateId {
                kind: "subnet",
                id: "hub/GatewaySubnet".to_string()
            }
        );
    }

    #[test]
    fn test_resources_flatten_subnets() {
        let model = TopologyModel::build(lab()).unwrap();
        let resources = model.resources();
        let subnets = resources
            .keys()
            .filter(|k| k.kind == ResourceKind::Subnet)
            .count();
        assert_eq!(subnets, 3);
        assert!(resources.contains_key(&ResourceKey::subnet("hub", "GatewaySubnet")));
        assert!(resources.contains_key(&ResourceKey::new(
            ResourceKind::DnsZone,
            "contoso.internal"
        )));
    }
}
